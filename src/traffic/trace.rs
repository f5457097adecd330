//! Request traces: one `R|W|I <hex address>` record per line, `#` starts a comment.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context};

use crate::mem::request::AccessKind;
use crate::traffic::patterns::TrafficOp;

pub fn load_trace(path: &Path) -> anyhow::Result<Vec<TrafficOp>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read trace file {}", path.display()))?;
    parse_trace(&text).with_context(|| format!("in trace file {}", path.display()))
}

pub fn parse_trace(text: &str) -> anyhow::Result<Vec<TrafficOp>> {
    let mut ops = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let op = parse_record(line).with_context(|| format!("line {}", lineno + 1))?;
        ops.push(op);
    }
    Ok(ops)
}

fn parse_record(line: &str) -> anyhow::Result<TrafficOp> {
    let mut fields = line.split_whitespace();
    let kind = match fields.next() {
        Some("R") | Some("r") => AccessKind::Read,
        Some("W") | Some("w") => AccessKind::Write,
        Some("I") | Some("i") => AccessKind::InstrFetch,
        Some(other) => bail!("unknown access kind '{}'", other),
        None => bail!("empty record"),
    };
    let addr = fields.next().ok_or_else(|| anyhow!("missing address"))?;
    let digits = addr
        .strip_prefix("0x")
        .or_else(|| addr.strip_prefix("0X"))
        .unwrap_or(addr);
    let addr = u64::from_str_radix(digits, 16)
        .with_context(|| format!("bad address '{}'", addr))?;
    if let Some(extra) = fields.next() {
        bail!("unexpected field '{}'", extra);
    }
    Ok(TrafficOp { addr, kind })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_records_and_skips_comments() {
        let text = "# warmup\nR 0x40\n\nW 80  # store\ni 0XC0\n";
        let ops = parse_trace(text).unwrap();
        assert_eq!(
            vec![
                TrafficOp { addr: 0x40, kind: AccessKind::Read },
                TrafficOp { addr: 0x80, kind: AccessKind::Write },
                TrafficOp { addr: 0xc0, kind: AccessKind::InstrFetch },
            ],
            ops
        );
    }

    #[test]
    fn errors_name_the_line() {
        let err = parse_trace("R 0x40\nX 0x80\n").unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("line 2"), "{}", message);
        assert!(message.contains("unknown access kind"), "{}", message);
    }

    #[test]
    fn rejects_bad_addresses_and_extra_fields() {
        assert!(parse_trace("R zz\n").is_err());
        assert!(parse_trace("R\n").is_err());
        assert!(parse_trace("R 0x40 7\n").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_trace(Path::new("/nonexistent/trace.txt")).is_err());
    }
}
