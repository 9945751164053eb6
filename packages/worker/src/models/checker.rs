/// Compare program output with the expected output.
///
/// Both sides are split into lines (`\n` or `\r\n`), trailing whitespace is
/// stripped from every line and trailing empty lines are dropped. The
/// remaining sequences must match exactly, so leading whitespace and blank
/// lines in the middle still count.
pub fn compare_output(actual: &str, expected: &str) -> bool {
    fn normalize(s: &str) -> Vec<&str> {
        let mut lines: Vec<&str> = s.lines().map(str::trim_end).collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines
    }
    normalize(actual) == normalize(expected)
}
