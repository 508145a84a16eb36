//! Lua Block Stripper
//!
//! Single-pass line filter that drops `*_by_lua_block` style directives
//! together with their whole brace-delimited body. Everything else passes
//! through byte-for-byte, terminators included.
//!
//! Brace counting is lexical: every `{` and `}` on a line counts, even inside
//! strings or comments. Unbalanced input never fails; an unclosed block just
//! swallows the rest of the dump.

use regex::Regex;
use tracing::warn;

use super::lines::split_lines;

/// Directives whose blocks are removed before scanning.
pub const DEFAULT_DIRECTIVES: &[&str] = &[
    "balancer_by_lua_block",
    "body_filter_by_lua_block",
    "content_by_lua_block",
    "header_filter_by_lua_block",
    "init_by_lua_block",
    "init_worker_by_lua_block",
    "log_by_lua_block",
    "lua_ingress",
    "rewrite_by_lua_block",
    "set_by_lua_block",
    "ssl_certificate_by_lua_block",
];

/// What happened to a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFate {
    Keep,
    /// First line of a removed block.
    DropOpener,
    /// Continuation line of a removed block (including its closing line).
    DropBody,
}

/// Per-scan state. Never shared between scans.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanState {
    removing: bool,
    depth: i64,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_removing(&self) -> bool {
        self.removing
    }

    pub fn depth(&self) -> i64 {
        self.depth
    }

    /// Advances the state by one line. `opens_block` is only consulted while
    /// not already removing.
    pub fn advance(&mut self, line: &str, opens_block: bool) -> LineFate {
        if self.removing {
            self.depth += brace_delta(line);
            if self.depth <= 0 {
                self.removing = false;
            }
            return LineFate::DropBody;
        }

        if !opens_block {
            return LineFate::Keep;
        }

        // A non-positive depth means the block closed on its own line.
        self.depth = brace_delta(line);
        self.removing = self.depth > 0;
        LineFate::DropOpener
    }
}

/// Net `{` minus `}` on a line.
fn brace_delta(line: &str) -> i64 {
    line.bytes().fold(0, |depth, b| match b {
        b'{' => depth + 1,
        b'}' => depth - 1,
        _ => depth,
    })
}

/// Counters gathered during one strip, for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StripStats {
    pub lines_in: usize,
    pub lines_removed: usize,
    pub blocks_removed: usize,
    /// The input ended while a block was still open.
    pub unterminated: bool,
}

#[derive(Debug, Clone)]
pub struct BlockStripper {
    directives: Vec<String>,
    opener: Regex,
}

impl BlockStripper {
    /// Stripper for [`DEFAULT_DIRECTIVES`].
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_extra_directives::<&str>(&[])
    }

    /// Stripper for [`DEFAULT_DIRECTIVES`] plus `extra`.
    ///
    /// Extra names must be plain identifiers (`[A-Za-z0-9_]+`); anything else
    /// is skipped with a warning, since a name ending in punctuation would
    /// break the word-boundary rule.
    pub fn with_extra_directives<S: AsRef<str>>(extra: &[S]) -> Result<Self, regex::Error> {
        let mut directives: Vec<String> =
            DEFAULT_DIRECTIVES.iter().map(|d| d.to_string()).collect();

        for name in extra {
            let name = name.as_ref().trim();
            if name.is_empty()
                || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
            {
                warn!("Ignoring invalid extra directive name {:?}", name);
                continue;
            }
            if !directives.iter().any(|d| d == name) {
                directives.push(name.to_string());
            }
        }

        let alternation = directives
            .iter()
            .map(|d| regex::escape(d))
            .collect::<Vec<_>>()
            .join("|");
        // Names are identifiers, so a `#`-led line can never match.
        let opener = Regex::new(&format!(r"^\s*(?:{})\b", alternation))?;

        Ok(Self { directives, opener })
    }

    pub fn directives(&self) -> &[String] {
        &self.directives
    }

    /// True if `line` opens a block that must be removed.
    pub fn is_block_opener(&self, line: &str) -> bool {
        self.opener.is_match(line)
    }

    /// Removes every matched block from `lines`, keeping the rest in order.
    pub fn strip<'a, I>(&self, lines: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.strip_with_stats(lines).0
    }

    pub fn strip_with_stats<'a, I>(&self, lines: I) -> (Vec<&'a str>, StripStats)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut state = ScanState::new();
        let mut stats = StripStats::default();
        let mut kept = Vec::new();

        for line in lines {
            stats.lines_in += 1;
            let opens_block = !state.is_removing() && self.is_block_opener(line);
            match state.advance(line, opens_block) {
                LineFate::Keep => kept.push(line),
                LineFate::DropOpener => {
                    stats.blocks_removed += 1;
                    stats.lines_removed += 1;
                }
                LineFate::DropBody => stats.lines_removed += 1,
            }
        }

        stats.unterminated = state.is_removing();
        (kept, stats)
    }

    /// Splits `text` into lines, strips it and joins the survivors back.
    pub fn strip_text(&self, text: &str) -> String {
        self.strip_text_with_stats(text).0
    }

    pub fn strip_text_with_stats(&self, text: &str) -> (String, StripStats) {
        let (kept, stats) = self.strip_with_stats(split_lines(text));
        (kept.concat(), stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripper() -> BlockStripper {
        BlockStripper::new().expect("default directives compile")
    }

    #[test]
    fn test_identity_without_openers() {
        let s = stripper();
        let samples = [
            "",
            "server {\n    listen 80;\n}\n",
            "http {\n  lua_shared_dict cache 10m;\n}",
            "\n\n   \n# just comments\n",
            "location / { return 200; }\r\n",
        ];
        for sample in samples {
            assert_eq!(s.strip_text(sample), sample, "sample {:?}", sample);
        }
    }

    #[test]
    fn test_nested_server_example() {
        let input = "server {\n    lua_ingress {\n        foo = 1;\n    }\n    listen 80;\n}\n";
        assert_eq!(stripper().strip_text(input), "server {\n    listen 80;\n}\n");
    }

    #[test]
    fn test_single_line_block_removes_only_opener() {
        let input = "a;\ncontent_by_lua_block { ngx.say(\"hi\") }\nb;\n";
        let (out, stats) = stripper().strip_text_with_stats(input);
        assert_eq!(out, "a;\nb;\n");
        assert_eq!(stats.lines_removed, 1);
        assert_eq!(stats.blocks_removed, 1);
        assert!(!stats.unterminated);
    }

    #[test]
    fn test_opener_without_braces_is_single_line() {
        let input = "lua_ingress;\nlisten 80;\n";
        assert_eq!(stripper().strip_text(input), "listen 80;\n");
    }

    #[test]
    fn test_multi_line_block_ends_at_first_zero_depth() {
        let input = "access_by_x;\n\
                     rewrite_by_lua_block {\n\
                     \x20   local x = 1\n\
                     }\n\
                     listen 443 ssl;\n";
        assert_eq!(
            stripper().strip_text(input),
            "access_by_x;\nlisten 443 ssl;\n"
        );
    }

    #[test]
    fn test_nested_braces_extend_removal() {
        let lines = vec![
            "content_by_lua_block {\n",
            "    if ngx.var.x then {\n",
            "    }\n",
            "}\n",
            "listen 80;\n",
            "server_name x;\n",
        ];
        let (out, stats) = stripper().strip_with_stats(lines);
        assert_eq!(out, vec!["listen 80;\n", "server_name x;\n"]);
        assert_eq!(stats.lines_removed, 4);
        assert_eq!(stats.lines_in, 6);
    }

    #[test]
    fn test_unterminated_block_drops_to_end() {
        let input = "keep;\ninit_by_lua_block {\n  require 'x'\nlisten 80;\n";
        let (out, stats) = stripper().strip_text_with_stats(input);
        assert_eq!(out, "keep;\n");
        assert!(stats.unterminated);
        assert_eq!(stats.lines_removed, 3);
    }

    #[test]
    fn test_longer_identifier_is_not_an_opener() {
        let s = stripper();
        assert!(!s.is_block_opener("lua_ingress_extra {\n"));
        assert!(!s.is_block_opener("log_by_lua_blocks {\n"));
        assert!(!s.is_block_opener("lua_ingressé {\n"));
        let input = "lua_ingress_extra {\n  x;\n}\n";
        assert_eq!(s.strip_text(input), input);
    }

    #[test]
    fn test_opener_may_be_followed_by_delimiter() {
        let s = stripper();
        assert!(s.is_block_opener("lua_ingress{\n"));
        assert!(s.is_block_opener("\t\tset_by_lua_block $res {\n"));
        assert!(s.is_block_opener("log_by_lua_block"));
    }

    #[test]
    fn test_commented_opener_passes_through() {
        let s = stripper();
        let input = "# lua_ingress { x }\n    #content_by_lua_block {\nlisten 80;\n";
        assert!(!s.is_block_opener("# lua_ingress { x }\n"));
        assert_eq!(s.strip_text(input), input);
    }

    #[test]
    fn test_directive_match_is_case_sensitive() {
        assert!(!stripper().is_block_opener("LUA_INGRESS {\n"));
    }

    #[test]
    fn test_directive_must_start_the_line() {
        assert!(!stripper().is_block_opener("server { lua_ingress { } }\n"));
    }

    #[test]
    fn test_comments_and_blank_lines_inside_block_are_dropped() {
        let input = "body_filter_by_lua_block {\n\n# }\n\n";
        // The commented brace still closes the block.
        assert_eq!(stripper().strip_text(input), "\n");
    }

    #[test]
    fn test_stray_closing_brace_on_opener_closes_immediately() {
        let input = "log_by_lua_block } {\n}\nlisten 80;\n";
        let (out, stats) = stripper().strip_text_with_stats(input);
        // depth is 0 after the opener, so `}` on the next line is kept.
        assert_eq!(out, "}\nlisten 80;\n");
        assert_eq!(stats.blocks_removed, 1);

        let negative = "header_filter_by_lua_block }}\nlisten 80;\n";
        assert_eq!(stripper().strip_text(negative), "listen 80;\n");
    }

    #[test]
    fn test_excess_closing_braces_end_block() {
        let input = "ssl_certificate_by_lua_block {\n  x }}}\nlisten 80;\n";
        assert_eq!(stripper().strip_text(input), "listen 80;\n");
    }

    #[test]
    fn test_back_to_back_blocks() {
        let input = "init_by_lua_block {\n}\ninit_worker_by_lua_block {\n}\nkeep;\n";
        let (out, stats) = stripper().strip_text_with_stats(input);
        assert_eq!(out, "keep;\n");
        assert_eq!(stats.blocks_removed, 2);
    }

    #[test]
    fn test_strip_is_idempotent() {
        let s = stripper();
        let input = "http {\n  balancer_by_lua_block {\n    a {\n    }\n  }\n  upstream x { server y; }\n}\n";
        let once = s.strip_text(input);
        assert_eq!(s.strip_text(&once), once);
    }

    #[test]
    fn test_terminators_preserved() {
        let input = "a\r\nlua_ingress {\r\n}\r\nb\rc";
        assert_eq!(stripper().strip_text(input), "a\r\nb\rc");
    }

    #[test]
    fn test_opener_after_form_feed_or_unicode_separator() {
        let s = stripper();
        assert_eq!(
            s.strip_text("listen 80;\x0ccontent_by_lua_block {\n x\n}\n"),
            "listen 80;\x0c"
        );
        for sep in ["\x0b", "\x1e", "\u{85}", "\u{2028}", "\u{2029}"] {
            let input = format!("listen 80;{}content_by_lua_block {{\n  ngx.say(1)\n}}\n", sep);
            assert_eq!(s.strip_text(&input), format!("listen 80;{}", sep), "separator {:?}", sep);
        }
    }

    #[test]
    fn test_extra_directives() {
        let s = BlockStripper::with_extra_directives(&["access_by_lua_block", "", "bad name!"])
            .expect("extra directives compile");
        assert!(s.is_block_opener("access_by_lua_block {\n"));
        assert_eq!(s.directives().len(), DEFAULT_DIRECTIVES.len() + 1);
        let input = "access_by_lua_block {\n}\nkeep;\n";
        assert_eq!(s.strip_text(input), "keep;\n");
    }

    #[test]
    fn test_duplicate_extra_directive_is_ignored() {
        let s = BlockStripper::with_extra_directives(&["lua_ingress"]).expect("compiles");
        assert_eq!(s.directives().len(), DEFAULT_DIRECTIVES.len());
    }

    #[test]
    fn test_scan_state_tracks_depth() {
        let mut state = ScanState::new();
        assert_eq!(state.advance("x {\n", true), LineFate::DropOpener);
        assert!(state.is_removing());
        assert_eq!(state.depth(), 1);
        assert_eq!(state.advance("{ {\n", false), LineFate::DropBody);
        assert_eq!(state.depth(), 3);
        assert_eq!(state.advance("}}}\n", false), LineFate::DropBody);
        assert!(!state.is_removing());
        assert_eq!(state.advance("y\n", false), LineFate::Keep);
    }
}
