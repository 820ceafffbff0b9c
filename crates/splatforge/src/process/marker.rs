//! Output-directory marker printed by the training tool.
//!
//! The trainer announces its output root with a line such as
//! `Output folder: ./output/3f2a9c1b7e`. The path is the first
//! whitespace-delimited token after the colon.

pub const OUTPUT_MARKER: &str = "Output folder:";

/// Extracts the output path from a single line, if it carries the marker.
pub fn parse_output_marker(line: &str) -> Option<&str> {
    line.trim_start()
        .strip_prefix(OUTPUT_MARKER)?
        .split_whitespace()
        .next()
}

/// Scans lines in order; the last marker wins.
pub fn find_output_marker<'a, I>(lines: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    lines.into_iter().filter_map(parse_output_marker).last()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stock_trainer_line() {
        let line = "Output folder: ./output/3f2a9c1b7e";
        let path = parse_output_marker(line).unwrap();
        assert_eq!(path, "./output/3f2a9c1b7e");
        assert_eq!(path.len(), 19);
    }

    #[test]
    fn test_parse_takes_whole_token() {
        assert_eq!(
            parse_output_marker("Output folder: ./output/2024-01-01-000000 [01/01 00:00:00]"),
            Some("./output/2024-01-01-000000")
        );
        assert_eq!(
            parse_output_marker("   Output folder:/abs/out\r"),
            Some("/abs/out")
        );
    }

    #[test]
    fn test_parse_rejects_other_lines() {
        assert_eq!(parse_output_marker("Training progress: 10%"), None);
        assert_eq!(parse_output_marker("Output folder:   "), None);
        assert_eq!(parse_output_marker("[log] Output folder: ./x"), None);
    }

    #[test]
    fn test_last_marker_wins() {
        let lines = [
            "Output folder: ./output/first00000",
            "Optimizing",
            "Output folder: ./output/second0000",
        ];
        assert_eq!(find_output_marker(lines), Some("./output/second0000"));
        assert_eq!(find_output_marker(["nothing"]), None);
    }
}
