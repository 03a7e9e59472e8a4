//! Minijinja digest templates, keyed by tenant locale.
//!
//! Templates are compiled-in strings, so a fresh [`minijinja::Environment`]
//! is created per render call. Rendering is deterministic for a given
//! context — the batcher relies on that when it stores the rendered
//! subject/body on the digest row.

use serde::Serialize;

use crate::traits::NotifyError;

/// One detection line in the digest body.
#[derive(Debug, Clone, Serialize)]
pub struct DigestLine {
    pub detection_type: String,
    pub severity: String,
    pub group_key: String,
    pub event_count: i64,
    pub first_event_at: String,
    pub last_event_at: String,
    /// Analyst summary from the AI stage, when one exists.
    pub ai_summary: Option<String>,
}

/// Context available to digest templates.
#[derive(Debug, Clone, Serialize)]
pub struct DigestContext {
    pub tenant_name: String,
    pub window_start: String,
    pub window_end: String,
    pub severity: String,
    pub detection_count: usize,
    pub event_count: i64,
    pub detections: Vec<DigestLine>,
}

#[derive(Debug, Clone)]
pub struct RenderedDigest {
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
}

const SUBJECT_EN: &str =
    "[Centinela] {{ severity | upper }}: {{ detection_count }} detection{{ 's' if detection_count != 1 else '' }} for {{ tenant_name }}";

const SUBJECT_ES: &str =
    "[Centinela] {{ severity | upper }}: {{ detection_count }} {{ 'detecciones' if detection_count != 1 else 'detección' }} para {{ tenant_name }}";

const BODY_TEXT_EN: &str = r#"Security digest for {{ tenant_name }}
Window: {{ window_start }} — {{ window_end }}
Detections: {{ detection_count }} ({{ event_count }} events)

{% for d in detections -%}
* [{{ d.severity | upper }}] {{ d.detection_type }} — {{ d.group_key }}
  {{ d.event_count }} events between {{ d.first_event_at }} and {{ d.last_event_at }}
{% if d.ai_summary %}  Analysis: {{ d.ai_summary }}
{% endif %}
{% endfor -%}

This digest consolidates all open detections for your account.
"#;

const BODY_TEXT_ES: &str = r#"Resumen de seguridad para {{ tenant_name }}
Ventana: {{ window_start }} — {{ window_end }}
Detecciones: {{ detection_count }} ({{ event_count }} eventos)

{% for d in detections -%}
* [{{ d.severity | upper }}] {{ d.detection_type }} — {{ d.group_key }}
  {{ d.event_count }} eventos entre {{ d.first_event_at }} y {{ d.last_event_at }}
{% if d.ai_summary %}  Análisis: {{ d.ai_summary }}
{% endif %}
{% endfor -%}

Este resumen consolida todas las detecciones abiertas de su cuenta.
"#;

const BODY_HTML: &str = r#"<html><body>
<h2>{{ tenant_name }}</h2>
<p>{{ window_start }} — {{ window_end }}</p>
<table border="1" cellpadding="4" cellspacing="0">
<tr><th>Severity</th><th>Detection</th><th>Key</th><th>Events</th><th>First</th><th>Last</th></tr>
{% for d in detections -%}
<tr>
<td>{{ d.severity | upper }}</td>
<td>{{ d.detection_type }}</td>
<td>{{ d.group_key }}</td>
<td>{{ d.event_count }}</td>
<td>{{ d.first_event_at }}</td>
<td>{{ d.last_event_at }}</td>
</tr>
{% endfor -%}
</table>
</body></html>
"#;

/// Render subject, text body, and HTML body for a digest.
///
/// Unknown locales fall back to English.
pub fn render_digest(locale: &str, ctx: &DigestContext) -> Result<RenderedDigest, NotifyError> {
    let (subject_tpl, body_tpl) = match locale {
        "es" => (SUBJECT_ES, BODY_TEXT_ES),
        _ => (SUBJECT_EN, BODY_TEXT_EN),
    };

    let env = minijinja::Environment::new();
    let render = |template: &str| -> Result<String, NotifyError> {
        env.render_str(template, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    };

    Ok(RenderedDigest {
        subject: render(subject_tpl)?,
        body_text: render(body_tpl)?,
        body_html: render(BODY_HTML)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> DigestContext {
        DigestContext {
            tenant_name: "Acme Networks".to_string(),
            window_start: "2024-01-15 08:00 UTC".to_string(),
            window_end: "2024-01-15 09:00 UTC".to_string(),
            severity: "critical".to_string(),
            detection_count: 2,
            event_count: 18,
            detections: vec![
                DigestLine {
                    detection_type: "admin_bruteforce".to_string(),
                    severity: "critical".to_string(),
                    group_key: "198.51.100.7".to_string(),
                    event_count: 12,
                    first_event_at: "08:01".to_string(),
                    last_event_at: "08:22".to_string(),
                    ai_summary: Some("Likely credential stuffing.".to_string()),
                },
                DigestLine {
                    detection_type: "config_change_burst".to_string(),
                    severity: "medium".to_string(),
                    group_key: "jsmith".to_string(),
                    event_count: 6,
                    first_event_at: "08:30".to_string(),
                    last_event_at: "08:41".to_string(),
                    ai_summary: None,
                },
            ],
        }
    }

    #[test]
    fn english_subject_and_body() {
        let rendered = render_digest("en", &ctx()).unwrap();
        assert_eq!(
            rendered.subject,
            "[Centinela] CRITICAL: 2 detections for Acme Networks"
        );
        assert!(rendered.body_text.contains("admin_bruteforce"));
        assert!(rendered.body_text.contains("198.51.100.7"));
        assert!(rendered.body_text.contains("Likely credential stuffing."));
        assert!(rendered.body_html.contains("<table"));
    }

    #[test]
    fn spanish_locale_selected_by_key() {
        let rendered = render_digest("es", &ctx()).unwrap();
        assert!(rendered.subject.contains("detecciones"));
        assert!(rendered.body_text.contains("Resumen de seguridad"));
        assert!(rendered.body_text.contains("eventos"));
    }

    #[test]
    fn singular_subject() {
        let mut context = ctx();
        context.detection_count = 1;
        let rendered = render_digest("en", &context).unwrap();
        assert!(rendered.subject.contains("1 detection for"));
    }

    #[test]
    fn unknown_locale_falls_back_to_english() {
        let rendered = render_digest("de", &ctx()).unwrap();
        assert!(rendered.subject.contains("detections for"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = render_digest("en", &ctx()).unwrap();
        let b = render_digest("en", &ctx()).unwrap();
        assert_eq!(a.subject, b.subject);
        assert_eq!(a.body_text, b.body_text);
        assert_eq!(a.body_html, b.body_html);
    }
}
