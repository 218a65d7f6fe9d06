/// Parse a `#!` header: the interpreter path and at most one
/// argument, per the classic kernel rule.
pub(super) fn parse(image: &[u8]) -> Option<(alloc::string::String, Option<alloc::string::String>)> {
    use alloc::string::ToString;

    if image.len() < 3 || &image[..2] != b"#!" {
        return None;
    }
    let line_end = image.iter().position(|&b| b == b'\n').unwrap_or(image.len());
    let line = core::str::from_utf8(&image[2..line_end]).ok()?.trim();
    if line.is_empty() {
        return None;
    }
    let mut parts = line.splitn(2, char::is_whitespace);
    let interp = parts.next()?.to_string();
    let arg = parts
        .next()
        .map(str::trim)
        .filter(|arg| !arg.is_empty())
        .map(|arg| arg.to_string());
    Some((interp, arg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_interp_and_single_arg() {
        let (interp, arg) = parse(b"#!/bin/sh -e\necho hi\n").unwrap();
        assert_eq!(interp, "/bin/sh");
        assert_eq!(arg.as_deref(), Some("-e"));
        let (interp, arg) = parse(b"#!/bin/busybox\n").unwrap();
        assert_eq!(interp, "/bin/busybox");
        assert_eq!(arg, None);
        assert!(parse(b"\x7fELF...").is_none());
    }
}
