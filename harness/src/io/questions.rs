//! Question discovery: each benchmark question lives in its own directory
//! as a `question.txt` file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// One discovered question: its file path plus the loaded text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionFile {
    pub path: PathBuf,
    pub text: String,
}

impl QuestionFile {
    /// The question's directory name, used as its identifier in result
    /// records.
    pub fn id(&self) -> String {
        self.path
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Recursively discover `question.txt` files under `base_dir`, sorted by
/// path for deterministic batch order.
pub fn discover_questions(base_dir: &Path) -> Result<Vec<QuestionFile>> {
    let mut paths = Vec::new();
    collect_question_paths(base_dir, &mut paths)?;
    paths.sort();

    let mut questions = Vec::with_capacity(paths.len());
    for path in paths {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("read question {}", path.display()))?
            .trim()
            .to_string();
        questions.push(QuestionFile { path, text });
    }
    Ok(questions)
}

fn collect_question_paths(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry.context("read dir entry")?;
        let path = entry.path();
        if path.is_dir() {
            collect_question_paths(&path, out)?;
        } else if path.file_name().is_some_and(|name| name == "question.txt") {
            out.push(path);
        }
    }
    Ok(())
}
