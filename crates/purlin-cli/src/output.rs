use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Print rows as left-aligned columns under a dashed header rule.
pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    for line in render_table(headers, rows) {
        println!("{line}");
    }
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) -> Vec<String> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    let mut out = Vec::with_capacity(rows.len() + 2);
    out.push(render_row(headers, &widths));
    out.push(render_row(&rule, &widths));
    for row in rows {
        out.push(render_row(row, &widths));
    }
    out
}

fn render_row<S: AsRef<str>>(cells: &[S], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{:width$}", cell.as_ref()))
        .collect();
    padded.join("  ").trim_end().to_string()
}
