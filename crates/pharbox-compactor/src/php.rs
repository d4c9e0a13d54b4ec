//! PHP comment and whitespace stripping
//!
//! A small scanner walks the source, copying strings, heredocs and inline
//! HTML verbatim. Comments are dropped and whitespace runs collapse to a
//! single space, or to their newlines when they span lines, so line numbers
//! in stack traces still point at the original source.

use crate::compactor::{Compactor, Extensions};
use crate::error::{CompactorError, CompactorResult};

/// Strips comments and redundant whitespace from PHP files
#[derive(Debug, Clone)]
pub struct Php {
    extensions: Extensions,
}

impl Default for Php {
    fn default() -> Self {
        Self::new(Extensions::new(["php"]))
    }
}

impl Php {
    /// Compactor for the given extensions
    pub fn new(extensions: Extensions) -> Self {
        Self { extensions }
    }
}

impl Compactor for Php {
    fn name(&self) -> &'static str {
        "php"
    }

    fn supports(&self, path: &str) -> bool {
        self.extensions.matches(path)
    }

    fn compact(&self, path: &str, contents: &str) -> CompactorResult<String> {
        let stripped = strip(contents.as_bytes()).map_err(|e| CompactorError::compaction(path, e))?;
        String::from_utf8(stripped).map_err(|e| CompactorError::compaction(path, e.to_string()))
    }
}

fn strip(src: &[u8]) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    let mut in_code = false;

    while i < src.len() {
        if !in_code {
            match find_open_tag(src, i) {
                Some(end) => {
                    out.extend_from_slice(&src[i..end]);
                    i = end;
                    in_code = true;
                }
                None => {
                    out.extend_from_slice(&src[i..]);
                    break;
                }
            }
            continue;
        }

        let rest = &src[i..];
        match rest[0] {
            b'?' if rest.starts_with(b"?>") => {
                out.extend_from_slice(b"?>");
                i += 2;
                in_code = false;
            }
            quote @ (b'\'' | b'"' | b'`') => {
                let end = quoted_end(src, i, quote);
                out.extend_from_slice(&src[i..end]);
                i = end;
            }
            b'/' if rest.starts_with(b"/*") => {
                let end = find(src, i + 2, b"*/").map_or(src.len(), |p| p + 2);
                let newlines = count_newlines(&src[i..end]);
                if newlines == 0 {
                    out.push(b' ');
                } else {
                    out.extend(std::iter::repeat_n(b'\n', newlines));
                }
                i = end;
            }
            b'/' if rest.starts_with(b"//") => i = line_comment_end(src, i + 2),
            b'#' if !rest.starts_with(b"#[") => i = line_comment_end(src, i + 1),
            b'<' if rest.starts_with(b"<<<") => {
                let end = heredoc_end(src, i)?;
                out.extend_from_slice(&src[i..end]);
                i = end;
            }
            b' ' | b'\t' | b'\r' | b'\n' => {
                let end = src[i..]
                    .iter()
                    .position(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
                    .map_or(src.len(), |p| i + p);
                let newlines = count_newlines(&src[i..end]);
                if newlines == 0 {
                    out.push(b' ');
                } else {
                    out.extend(std::iter::repeat_n(b'\n', newlines));
                }
                i = end;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }

    Ok(out)
}

/// End of the next `<?php` or `<?=` tag
fn find_open_tag(src: &[u8], from: usize) -> Option<usize> {
    let mut at = from;
    while let Some(start) = find(src, at, b"<?") {
        let after = &src[start + 2..];
        if after.len() >= 3 && after[..3].eq_ignore_ascii_case(b"php") {
            return Some(start + 5);
        }
        if after.first() == Some(&b'=') {
            return Some(start + 3);
        }
        at = start + 2;
    }
    None
}

fn find(src: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    src.get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}

fn count_newlines(bytes: &[u8]) -> usize {
    bytes.iter().filter(|&&b| b == b'\n').count()
}

/// End of a quoted string starting at `start`, past the closing quote
fn quoted_end(src: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < src.len() {
        match src[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    src.len()
}

/// A line comment ends before the newline or a closing `?>`
fn line_comment_end(src: &[u8], from: usize) -> usize {
    let mut i = from;
    while i < src.len() {
        if src[i] == b'\n' || src[i..].starts_with(b"?>") {
            return i;
        }
        i += 1;
    }
    src.len()
}

fn is_label_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// End of a heredoc or nowdoc starting at `start`, past its closing label
fn heredoc_end(src: &[u8], start: usize) -> Result<usize, String> {
    let mut i = start + 3;
    while i < src.len() && matches!(src[i], b' ' | b'\t') {
        i += 1;
    }

    let quote = match src.get(i) {
        Some(&q @ (b'\'' | b'"')) => {
            i += 1;
            Some(q)
        }
        _ => None,
    };

    let label_start = i;
    while i < src.len() && is_label_byte(src[i]) {
        i += 1;
    }
    let label = &src[label_start..i];
    if label.is_empty() {
        return Err("malformed heredoc label".to_string());
    }
    if let Some(q) = quote {
        if src.get(i) != Some(&q) {
            return Err("malformed heredoc label".to_string());
        }
        i += 1;
    }

    // Body starts on the next line
    let mut line = match find(src, i, b"\n") {
        Some(p) => p + 1,
        None => return Err("unterminated heredoc".to_string()),
    };

    while line < src.len() {
        let mut j = line;
        while j < src.len() && matches!(src[j], b' ' | b'\t') {
            j += 1;
        }
        if src[j..].starts_with(label)
            && src.get(j + label.len()).is_none_or(|&b| !is_label_byte(b))
        {
            return Ok(j + label.len());
        }
        line = match find(src, line, b"\n") {
            Some(p) => p + 1,
            None => break,
        };
    }

    Err(format!(
        "unterminated heredoc <<<{}",
        String::from_utf8_lossy(label)
    ))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compact(source: &str) -> String {
        Php::default().compact("test.php", source).unwrap()
    }

    #[test]
    fn test_strips_comments_keeping_lines() {
        let source = "<?php\n\n/**\n * Kernel\n */\nfinal class Kernel // trailing\n{\n    # hash\n}\n";
        let compacted = compact(source);

        assert_eq!(compacted, "<?php\n\n\n\n\nfinal class Kernel \n{\n\n}\n");
        assert_eq!(
            compacted.lines().count(),
            source.lines().count(),
            "line numbers must be preserved"
        );
    }

    #[test]
    fn test_collapses_horizontal_whitespace() {
        assert_eq!(compact("<?php   echo    1 ;"), "<?php echo 1 ;");
        assert_eq!(compact("<?php $a/**/+ 1;"), "<?php $a + 1;");
    }

    #[test]
    fn test_strings_are_verbatim() {
        let source = "<?php $a = '/* not a comment */'; $b = \"# nor \\\" this //\";";
        assert_eq!(compact(source), source);
    }

    #[test]
    fn test_heredoc_is_verbatim() {
        let source = "<?php\n$sql = <<<SQL\n    SELECT *   -- keep\n    # keep\n    SQL;\necho $sql; // drop\n";
        assert_eq!(
            compact(source),
            "<?php\n$sql = <<<SQL\n    SELECT *   -- keep\n    # keep\n    SQL;\necho $sql; \n"
        );
    }

    #[test]
    fn test_nowdoc_is_verbatim() {
        let source = "<?php\n$t = <<<'EOT'\n/* raw */\nEOT;\n";
        assert_eq!(compact(source), source);
    }

    #[test]
    fn test_inline_html_is_verbatim() {
        let source = "<html>  # not php\n<?php echo 1; // c ?>\n<p>  /* text */  </p>";
        assert_eq!(
            compact(source),
            "<html>  # not php\n<?php echo 1; ?>\n<p>  /* text */  </p>"
        );
    }

    #[test]
    fn test_attributes_are_kept() {
        assert_eq!(
            compact("<?php\n#[Route('/')]\nfunction home() {}"),
            "<?php\n#[Route('/')]\nfunction home() {}"
        );
    }

    #[test]
    fn test_unterminated_heredoc_fails() {
        let result = Php::default().compact("broken.php", "<?php $a = <<<EOT\nnever closed");
        assert!(matches!(result, Err(CompactorError::Compaction { .. })));
    }

    #[test]
    fn test_only_php_files() {
        let php = Php::default();
        assert!(php.supports("src/Kernel.php"));
        assert!(!php.supports("templates/page.twig"));
    }
}
