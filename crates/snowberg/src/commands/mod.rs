pub mod connections;
pub mod inspect;
pub mod provision;
pub mod table;

use std::io::IsTerminal;

/// Prompts only make sense with a human on the other end
pub(crate) fn is_interactive() -> bool {
    std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
}
