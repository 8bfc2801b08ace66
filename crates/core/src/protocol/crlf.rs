//! `\r\n` to `\n` rewriting for legacy shell output
//!
//! Old devices run legacy `shell:` commands through a pty that turns every
//! `\n` into `\r\n`. The output arrives in arbitrary chunks, so a `\r` at the
//! end of a chunk is held back until the next byte is known.

/// Streaming `\r\n` stripper
#[derive(Debug, Default)]
pub struct StripCrLf {
    pending_cr: bool,
}

impl StripCrLf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the stripped form of `input` to `out`
    pub fn process(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.reserve(input.len() + 1);
        for &byte in input {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    out.push(b'\n');
                    continue;
                }
                out.push(b'\r');
            }

            if byte == b'\r' {
                self.pending_cr = true;
            } else {
                out.push(byte);
            }
        }
    }

    /// Flush a `\r` held back at end of stream
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if std::mem::take(&mut self.pending_cr) {
            out.push(b'\r');
        }
    }
}

/// Strip a complete buffer in one pass
pub fn strip_crlf(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut stripper = StripCrLf::new();
    stripper.process(input, &mut out);
    stripper.finish(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Plain left-to-right replacement of every `\r\n`
    fn replace_crlf(input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len());
        let mut i = 0;
        while i < input.len() {
            if input[i] == b'\r' && input.get(i + 1) == Some(&b'\n') {
                out.push(b'\n');
                i += 2;
            } else {
                out.push(input[i]);
                i += 1;
            }
        }
        out
    }

    #[test]
    fn test_strip_simple() {
        assert_eq!(strip_crlf(b"a\r\nb\r\n"), b"a\nb\n");
        assert_eq!(strip_crlf(b"a\rb"), b"a\rb");
        assert_eq!(strip_crlf(b"\r\r\n"), b"\r\n");
        assert_eq!(strip_crlf(b"end\r"), b"end\r");
    }

    #[test]
    fn test_pair_split_across_chunks() {
        let mut stripper = StripCrLf::new();
        let mut out = Vec::new();
        stripper.process(b"line 1\r", &mut out);
        assert_eq!(out, b"line 1");
        stripper.process(b"\nline 2", &mut out);
        stripper.finish(&mut out);
        assert_eq!(out, b"line 1\nline 2");
    }

    fn crlf_heavy_bytes() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(
            prop_oneof![Just(b'\r'), Just(b'\n'), Just(b'a'), any::<u8>()],
            0..256,
        )
    }

    proptest! {
        #[test]
        fn chunked_stripping_matches_single_pass(
            input in crlf_heavy_bytes(),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
        ) {
            let mut points: Vec<usize> = cuts.iter().map(|c| c.index(input.len() + 1)).collect();
            points.sort_unstable();

            let mut stripper = StripCrLf::new();
            let mut out = Vec::new();
            let mut start = 0;
            for point in points {
                stripper.process(&input[start..point], &mut out);
                start = point;
            }
            stripper.process(&input[start..], &mut out);
            stripper.finish(&mut out);

            prop_assert_eq!(&out, &strip_crlf(&input));
            prop_assert_eq!(out, replace_crlf(&input));
        }
    }
}
