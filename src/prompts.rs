//! Stage prompts as data.
//!
//! Each review stage ships a built-in prompt; an installation can override
//! any of them by dropping `<name>.txt` into the prompts directory.

use crate::config::HookPaths;

const COMPLETION_EXTERNAL: &str = include_str!("prompts/completion_external.txt");
const PLAN: &str = include_str!("prompts/plan.txt");
const CODE: &str = include_str!("prompts/code.txt");
const TEST: &str = include_str!("prompts/test.txt");
const FINAL: &str = include_str!("prompts/final.txt");

/// Load the prompt for `name`, preferring a file override.
pub fn load_prompt(paths: &HookPaths, name: &str) -> String {
    let override_path = paths.prompts_dir().join(format!("{name}.txt"));
    match std::fs::read_to_string(&override_path) {
        Ok(text) => text,
        Err(_) => builtin(name).to_string(),
    }
}

fn builtin(name: &str) -> &'static str {
    match name {
        "completion_external" => COMPLETION_EXTERNAL,
        "plan" => PLAN,
        "test" => TEST,
        "final" => FINAL,
        // unknown stages review as code
        _ => CODE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_prompts_nonempty() {
        for name in ["completion_external", "plan", "code", "test", "final"] {
            assert!(!builtin(name).trim().is_empty(), "empty prompt for {name}");
        }
    }

    #[test]
    fn test_unknown_stage_falls_back_to_code() {
        assert_eq!(builtin("mystery"), CODE);
    }

    #[test]
    fn test_file_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HookPaths::new(dir.path());
        std::fs::create_dir_all(paths.prompts_dir()).unwrap();
        std::fs::write(paths.prompts_dir().join("code.txt"), "custom prompt").unwrap();
        assert_eq!(load_prompt(&paths, "code"), "custom prompt");
        assert_eq!(load_prompt(&paths, "plan"), PLAN);
    }
}
