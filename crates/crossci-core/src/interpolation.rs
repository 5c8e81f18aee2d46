use crate::ids::PlatformId;
use crate::workflow::EnvOverlay;
use regex::Regex;
use std::sync::LazyLock;

static EXPRESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("valid expression regex"));

/// Context for `${{ ... }}` interpolation in step commands.
///
/// Supports:
/// - `${{ platform }}` - the platform the job is bound to
/// - `${{ env.NAME }}` - a variable from the environment overlay
#[derive(Debug, Clone, Copy)]
pub struct InterpolationContext<'a> {
    pub platform: &'a PlatformId,
    pub overlay: &'a EnvOverlay,
}

/// A `${{ }}` reference found in a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Platform,
    Env(String),
    Unknown(String),
}

impl<'a> InterpolationContext<'a> {
    pub fn new(platform: &'a PlatformId, overlay: &'a EnvOverlay) -> Self {
        Self { platform, overlay }
    }

    /// Interpolate references in a string. Unresolvable references become empty.
    pub fn interpolate(&self, input: &str) -> String {
        EXPRESSION
            .replace_all(input, |caps: &regex::Captures| {
                let expr = caps.get(1).map_or("", |m| m.as_str());
                match parse_reference(expr) {
                    Reference::Platform => self.platform.to_string(),
                    Reference::Env(name) => self.overlay.get(&name).unwrap_or_default().to_string(),
                    Reference::Unknown(_) => String::new(),
                }
            })
            .into_owned()
    }
}

/// All references in `input`, in order of appearance.
pub fn references(input: &str) -> Vec<Reference> {
    EXPRESSION
        .captures_iter(input)
        .filter_map(|caps| caps.get(1))
        .map(|m| parse_reference(m.as_str()))
        .collect()
}

fn parse_reference(expr: &str) -> Reference {
    let expr = expr.trim();
    if expr == "platform" {
        return Reference::Platform;
    }
    match expr.strip_prefix("env.") {
        Some(name) if !name.is_empty() => Reference::Env(name.to_string()),
        _ => Reference::Unknown(expr.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_platform_and_env() {
        let platform = PlatformId::new("linux");
        let overlay = EnvOverlay::from_iter([("CARGO_TERM_COLOR", "always")]);
        let ctx = InterpolationContext::new(&platform, &overlay);

        assert_eq!(
            ctx.interpolate("echo ${{ platform }} ${{env.CARGO_TERM_COLOR}}"),
            "echo linux always"
        );
    }

    #[test]
    fn test_interpolate_missing_returns_empty() {
        let platform = PlatformId::new("macos");
        let overlay = EnvOverlay::default();
        let ctx = InterpolationContext::new(&platform, &overlay);

        assert_eq!(ctx.interpolate("[${{ env.MISSING }}]"), "[]");
        assert_eq!(ctx.interpolate("[${{ secrets.TOKEN }}]"), "[]");
    }

    #[test]
    fn test_interpolate_leaves_shell_variables_alone() {
        let platform = PlatformId::new("linux");
        let overlay = EnvOverlay::default();
        let ctx = InterpolationContext::new(&platform, &overlay);

        assert_eq!(ctx.interpolate("echo $PATH ${HOME}"), "echo $PATH ${HOME}");
    }

    #[test]
    fn test_references() {
        assert_eq!(
            references("${{ platform }} ${{ env.A }} ${{ matrix.os }}"),
            vec![
                Reference::Platform,
                Reference::Env("A".to_string()),
                Reference::Unknown("matrix.os".to_string()),
            ]
        );
    }
}
