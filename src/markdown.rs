/// Convert rendered HTML to Markdown. `None` when nothing but whitespace is left.
pub fn html_to_markdown(html: &str) -> Option<String> {
    let md = html2md::rewrite_html(html, false);
    let md = collapse_blank_lines(&md);
    let md = md.trim();
    if md.is_empty() {
        None
    } else {
        Some(md.to_string())
    }
}

/// Squeeze runs of blank lines down to one, leaving fenced code blocks untouched.
fn collapse_blank_lines(md: &str) -> String {
    let mut out = String::with_capacity(md.len());
    let mut in_fence = false;
    let mut prev_blank = false;

    for line in md.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }

        let blank = line.trim().is_empty();
        if blank && prev_blank && !in_fence {
            continue;
        }
        prev_blank = blank;
        out.push_str(line);
        out.push('\n');
    }
    out
}
