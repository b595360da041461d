//! Argument sanitization for values forwarded to external processes.
//!
//! Commands are always spawned with argument vectors, never through a shell, so
//! this is a second line of defence for values that might later be echoed into
//! a shell by a collaborator. Flag injection is not handled here: when user
//! content is forwarded as a positional argument, pass `--` before it.

/// Characters that can change how a shell splits, chains, or redirects a command.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '<', '>', '(', ')', '{', '}', '\n', '\r', '\0',
];

/// Strip shell metacharacters, preserving every other character.
///
/// Idempotent: `sanitize(&sanitize(x)) == sanitize(x)`.
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .filter(|c| !SHELL_METACHARACTERS.contains(c))
        .collect()
}
