//! Console rendering of workflow progress

use snowberg_core::{ProvisionError, Stage, StageObserver};

/// Prints one line per stage start and an indented result line
pub struct ConsoleProgress;

fn position(stage: Stage) -> (usize, usize) {
    let index = Stage::ALL.iter().position(|s| *s == stage).unwrap_or(0);
    (index + 1, Stage::ALL.len())
}

impl StageObserver for ConsoleProgress {
    fn stage_started(&self, stage: Stage) {
        let (n, total) = position(stage);
        println!("[{}/{}] {}...", n, total, stage);
    }

    fn stage_completed(&self, _stage: Stage, detail: &str) {
        println!("      ok: {}", detail);
    }

    fn stage_failed(&self, _stage: Stage, error: &ProvisionError) {
        println!("      FAILED ({})", error.code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_cover_all_stages() {
        assert_eq!(position(Stage::Validation), (1, 8));
        assert_eq!(position(Stage::Trust), (8, 8));
    }
}
