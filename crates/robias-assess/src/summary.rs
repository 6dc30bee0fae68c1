/// Split the model's comma-separated summary into table cells.
/// Cells are trimmed and empty cells dropped, so `"Low, High,"` gives two cells.
pub fn split_summary(summary: &str) -> Vec<String> {
    summary
        .split(',')
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .map(str::to_string)
        .collect()
}
