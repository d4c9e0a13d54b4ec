//! Stub handling
//!
//! The stub is the PHP bootstrap at the front of the archive. PHP stops
//! parsing at `__HALT_COMPILER();`, and the manifest starts right after the
//! closing ` ?>` and line break.

use crate::phar::constants::HALT_COMPILER;
use crate::phar::error::{PharError, PharResult};

/// Stub used when none is registered
pub const DEFAULT_STUB: &str = "<?php __HALT_COMPILER(); ?>\r\n";

/// Case-insensitive search for an ASCII needle
pub(crate) fn find_ascii_case_insensitive(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

/// Cut everything after `__HALT_COMPILER();` and append ` ?>\r\n`
pub fn normalize_stub(stub: &[u8]) -> PharResult<Vec<u8>> {
    let position = find_ascii_case_insensitive(stub, HALT_COMPILER.as_bytes())
        .ok_or(PharError::MissingHaltCompiler)?;

    let mut normalized = stub[..position + HALT_COMPILER.len()].to_vec();
    normalized.extend_from_slice(b" ?>\r\n");
    Ok(normalized)
}

/// Offset of the manifest in a complete archive
pub fn manifest_offset(data: &[u8]) -> PharResult<usize> {
    let position = find_ascii_case_insensitive(data, HALT_COMPILER.as_bytes())
        .ok_or(PharError::MissingHaltCompiler)?;
    let mut offset = position + HALT_COMPILER.len();

    let rest = &data[offset..];
    if rest.starts_with(b" ?>") {
        offset += 3;
    } else if rest.starts_with(b"?>") {
        offset += 2;
    }

    let rest = &data[offset..];
    if rest.starts_with(b"\r\n") {
        offset += 2;
    } else if rest.starts_with(b"\n") {
        offset += 1;
    }

    Ok(offset)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_appends_closing_tag() {
        let stub = b"#!/usr/bin/env php\n<?php\nPhar::mapPhar('app.phar');\n__HALT_COMPILER();";
        let normalized = normalize_stub(stub).expect("normalize should succeed");
        assert!(normalized.ends_with(b"__HALT_COMPILER(); ?>\r\n"));
        assert!(normalized.starts_with(b"#!/usr/bin/env php\n"));
    }

    #[test]
    fn test_normalize_discards_trailing_bytes() {
        let normalized =
            normalize_stub(b"<?php __halt_compiler(); ?>\n garbage").expect("normalize");
        assert_eq!(normalized, b"<?php __halt_compiler(); ?>\r\n");
    }

    #[test]
    fn test_normalize_requires_halt_compiler() {
        assert!(matches!(
            normalize_stub(b"<?php echo 1;"),
            Err(PharError::MissingHaltCompiler)
        ));
    }

    #[test]
    fn test_manifest_offset_variants() {
        assert_eq!(manifest_offset(DEFAULT_STUB.as_bytes()).unwrap(), DEFAULT_STUB.len());
        assert_eq!(manifest_offset(b"<?php __HALT_COMPILER();?>\nXX").unwrap(), 27);
        assert_eq!(manifest_offset(b"<?php __HALT_COMPILER();XX").unwrap(), 24);
    }
}
