// Nom helpers, mainly.
use nom::{
    branch::alt,
    bytes::streaming::{tag, take_while1},
    character::complete as char_comp,
    combinator::map_res,
    Err, IResult, Needed, Parser,
};

/// Match either LF or CRLF.
// (Streaming)
pub fn any_newline(i: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((tag(&b"\r\n"[..]), tag(&b"\n"[..]))).parse(i)
}

/// Take until the first newline character.
// (Streaming)
pub fn take_until_newline(i: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(|c| c != b'\r' && c != b'\n').parse(i)
}

/// Take everything up to and including an empty line.
/// The returned head keeps its final newline; the empty line is consumed.
/// (Streaming)
pub fn take_until_empty_line(i: &[u8]) -> IResult<&[u8], &[u8]> {
    for pos in 0..i.len() {
        if i[pos..].starts_with(b"\n\n") {
            let (head, rest) = i.split_at(pos + 1);
            return Ok((&rest[1..], head));
        }
        if i[pos..].starts_with(b"\r\n\r\n") {
            let (head, rest) = i.split_at(pos + 2);
            return Ok((&rest[2..], head));
        }
    }
    Err(Err::Incomplete(Needed::Unknown))
}

/// Parse ASCII digits to u32.
/// (Complete)
pub fn parse_u32(i: &[u8]) -> IResult<&[u8], u32> {
    map_res(char_comp::digit1, |d: &[u8]| {
        // digit1 only matches [0-9]+, so from_utf8 cannot fail.
        str::from_utf8(d).unwrap().parse()
    })(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u32() {
        let (rem, num) = parse_u32(b"123\n").unwrap();
        assert_eq!(num, 123);
        assert_eq!(rem, b"\n");

        let (rem, num) = parse_u32(b"16").unwrap();
        assert_eq!(num, 16);
        assert_eq!(rem, b"");
    }

    #[test]
    fn test_take_until_empty_line() {
        let input = b"foo\nbar\n\nbaz\n\n";
        let (rem, head) = take_until_empty_line(input).unwrap();
        assert_eq!(head, b"foo\nbar\n");
        assert_eq!(rem, b"baz\n\n");

        let input = b"hello\r\n\r\nworld";
        let (rem, head) = take_until_empty_line(input).unwrap();
        assert_eq!(head, b"hello\r\n");
        assert_eq!(rem, b"world");

        let input = b"no blank line";
        assert!(take_until_empty_line(input).is_err());
    }
}
