//! HTML overview of every stored metric

use axum::{extract::State, response::Html};

use crate::api::{ApiResult, ApiState};
use crate::storage::Snapshot;

/// GET /
pub async fn list_metrics(State(state): State<ApiState>) -> ApiResult<Html<String>> {
    let snapshot = state.storage.get_all().await?;
    Ok(Html(render(&snapshot)))
}

fn render(snapshot: &Snapshot) -> String {
    let mut html = String::from("<html><head><title>Metrics</title></head><body>");

    html.push_str("<h1>Gauges</h1><ul>");
    let mut gauges: Vec<_> = snapshot.gauge.iter().collect();
    gauges.sort_by(|a, b| a.0.cmp(b.0));
    for (name, value) in gauges {
        html.push_str(&format!("<li>{}: {}</li>", escape(name), value));
    }

    html.push_str("</ul><h1>Counters</h1><ul>");
    let mut counters: Vec<_> = snapshot.counter.iter().collect();
    counters.sort_by(|a, b| a.0.cmp(b.0));
    for (name, delta) in counters {
        html.push_str(&format!("<li>{}: {}</li>", escape(name), delta));
    }

    html.push_str("</ul></body></html>");
    html
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
