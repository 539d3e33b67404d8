use vigil_core::{Alert, AlertEvent, Monitor};

/// Plain-text and HTML renderings of one alert event.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub subject: String,
    pub text: String,
    pub html: String,
}

fn event_label(event: AlertEvent) -> &'static str {
    match event {
        AlertEvent::Triggered => "ALERT",
        AlertEvent::Escalated => "ESCALATED",
        AlertEvent::Acknowledged => "ACKNOWLEDGED",
        AlertEvent::Recovered => "RECOVERED",
        AlertEvent::Reminder => "REMINDER",
    }
}

/// Escape text for embedding in HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Render the notification bodies for `(monitor, alert, event)`.
///
/// Certificate alerts get a specialised body with the expiry details and
/// remediation hint; everything else uses the standard form built around
/// the alert message.
pub fn render(monitor: &Monitor, alert: &Alert, event: AlertEvent) -> Rendered {
    let label = event_label(event);
    let subject = format!("[{label}] {} {}", monitor.name, alert.severity);

    let mut lines = vec![
        alert.message.clone(),
        String::new(),
        format!("Monitor:   {} ({})", monitor.name, monitor.kind.label()),
        format!("Severity:  {}", alert.severity),
        format!("Event:     {event}"),
        format!("Triggered: {}", alert.triggered_at.format("%Y-%m-%d %H:%M:%S UTC")),
    ];

    if let Some(value) = alert.current_value {
        lines.push(format!("Value:     {value}"));
    }
    if let Some(threshold) = alert.threshold_value {
        lines.push(format!("Threshold: {threshold}"));
    }
    lines.push(format!("Failures:  {}", alert.consecutive_failures));

    if let Some(recovered_at) = alert.recovered_at {
        lines.push(format!(
            "Recovered: {}",
            recovered_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }

    if let Some(cert) = &alert.metadata.certificate {
        lines.push(String::new());
        lines.push(format!("Days remaining: {}", cert.days_remaining));
        lines.push(format!("Expires:        {}", cert.not_after.format("%Y-%m-%d")));
        lines.push(format!("Issuer:         {}", cert.issuer));
        if let Some(cn) = &cert.common_name {
            lines.push(format!("Common name:    {cn}"));
        }
        if !cert.sans.is_empty() {
            lines.push(format!("SANs:           {}", cert.sans.join(", ")));
        }
        lines.push(String::new());
        lines.push("Renew and deploy the certificate before the expiry date.".to_string());
    }

    if !alert.metadata.log_matches.is_empty() {
        lines.push(String::new());
        lines.push("Matched lines:".to_string());
        for line in &alert.metadata.log_matches {
            lines.push(format!("  {line}"));
        }
        for hint in &alert.metadata.solutions {
            lines.push(format!("Hint: {hint}"));
        }
    }

    let text = lines.join("\n");

    let html = format!(
        "<html><body><h2>[{label}] {name} {severity}</h2><pre>{body}</pre></body></html>",
        name = escape_html(&monitor.name),
        severity = alert.severity,
        body = escape_html(&text),
    );

    Rendered {
        subject,
        text,
        html,
    }
}
