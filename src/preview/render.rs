use crate::trace::MatchLocation;

/// Builds the highlight-capable preview page from a document's extracted
/// text. Character spans become `<mark>` anchors the embedded script can
/// walk with previous/next; cell locations are listed as navigation chips
/// since they have no offset into the text rendition.
pub fn render_preview_page(
    document_name: &str,
    content: &str,
    locator: &[MatchLocation],
) -> String {
    let spans = text_spans(locator, content.chars().count());
    let body = highlighted_body(content, &spans);
    let chips = cell_chips(locator);
    let title = escape_html(document_name);

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{title}</title>
<style>
body {{ font-family: -apple-system, "Segoe UI", Roboto, sans-serif; line-height: 1.6; color: #333; background: #f5f5f5; margin: 0; }}
.container {{ max-width: 900px; margin: 0 auto; padding: 20px; }}
.header {{ background: #fff; border-radius: 8px; padding: 20px; margin-bottom: 20px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }}
.header h1 {{ font-size: 1.4rem; margin: 0 0 10px; word-break: break-all; }}
.nav button {{ padding: 6px 14px; border: none; border-radius: 4px; background: #1890ff; color: #fff; cursor: pointer; margin-right: 8px; }}
.nav button:hover {{ background: #40a9ff; }}
.chips span {{ display: inline-block; background: #e6f7ff; border-radius: 4px; padding: 2px 8px; margin: 2px; font-size: 13px; }}
.content {{ background: #fff; border-radius: 8px; padding: 30px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); white-space: pre-wrap; word-wrap: break-word; }}
mark.highlight {{ background: #ffeb3b; padding: 1px 2px; border-radius: 2px; }}
mark.highlight.current {{ background: #ffc107; }}
</style>
</head>
<body>
<div class="container">
  <div class="header">
    <h1>{title}</h1>
    <div class="nav">
      <button onclick="gotoMatch(current - 1)">Previous</button>
      <button onclick="gotoMatch(current + 1)">Next</button>
      <span id="match-counter"></span>
    </div>
    <div class="chips">{chips}</div>
  </div>
  <div class="content">{body}</div>
</div>
<script>
var marks = document.querySelectorAll('mark.highlight');
var current = 0;
function gotoMatch(index) {{
  if (marks.length === 0) return;
  current = ((index % marks.length) + marks.length) % marks.length;
  marks.forEach(function(mark) {{ mark.classList.remove('current'); }});
  marks[current].classList.add('current');
  marks[current].scrollIntoView({{ behavior: 'smooth', block: 'center' }});
  document.getElementById('match-counter').textContent =
    (current + 1) + ' / ' + marks.length;
}}
window.addEventListener('load', function() {{ setTimeout(function() {{ gotoMatch(0); }}, 300); }});
</script>
</body>
</html>"#
    )
}

/// Character spans from the locator, clamped to the content length, sorted,
/// and merged so the markup never nests.
fn text_spans(locator: &[MatchLocation], content_chars: usize) -> Vec<(usize, usize)> {
    let mut spans: Vec<(usize, usize)> = locator
        .iter()
        .filter_map(|location| match location {
            MatchLocation::Text { start, end, .. } => {
                let start = (*start as usize).min(content_chars);
                let end = (*end as usize).min(content_chars);
                (start < end).then_some((start, end))
            }
            MatchLocation::Cell { .. } => None,
        })
        .collect();
    spans.sort();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => *last_end = (*last_end).max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Escapes segment-wise so the span offsets, which refer to the raw text,
/// stay valid.
fn highlighted_body(content: &str, spans: &[(usize, usize)]) -> String {
    let chars: Vec<char> = content.chars().collect();
    let mut body = String::with_capacity(content.len() + spans.len() * 32);
    let mut cursor = 0usize;

    for (index, (start, end)) in spans.iter().enumerate() {
        let plain: String = chars[cursor..*start].iter().collect();
        body.push_str(&escape_html(&plain));
        let marked: String = chars[*start..*end].iter().collect();
        body.push_str(&format!(
            "<mark id=\"match-{index}\" class=\"highlight\">{}</mark>",
            escape_html(&marked)
        ));
        cursor = *end;
    }
    let tail: String = chars[cursor..].iter().collect();
    body.push_str(&escape_html(&tail));
    body
}

fn cell_chips(locator: &[MatchLocation]) -> String {
    locator
        .iter()
        .filter_map(|location| match location {
            MatchLocation::Cell { sheet, row, column } => Some(format!(
                "<span>{} · R{row}C{column}</span>",
                escape_html(sheet)
            )),
            MatchLocation::Text { .. } => None,
        })
        .collect()
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
