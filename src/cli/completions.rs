//! `octopus completions` - Generate shell completions

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::Shell;
use std::fs;
use std::path::Path;

use super::Args;

/// Renders completions for `shell`
pub fn generate_completions(shell: Shell) -> Result<String> {
    let mut cmd = Args::command();
    let mut buf = Vec::new();
    clap_complete::generate(shell, &mut cmd, "octopus", &mut buf);

    String::from_utf8(buf).context("Failed to generate completions")
}

/// Writes completions to a file
pub fn save_completions(completions: &str, output_path: &Path) -> Result<()> {
    fs::write(output_path, completions)
        .with_context(|| format!("Failed to write completions to: {}", output_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_bash_completions() {
        let completions = generate_completions(Shell::Bash).unwrap();
        assert!(completions.contains("octopus"));
        assert!(completions.contains("completions"));
    }

    #[test]
    fn test_generate_fish_completions() {
        let completions = generate_completions(Shell::Fish).unwrap();
        assert!(completions.contains("--set"));
    }

    #[test]
    fn test_save_completions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("octopus.bash");
        save_completions("complete -F _octopus octopus", &path).unwrap();
        assert!(fs::read_to_string(path).unwrap().contains("_octopus"));
    }
}
