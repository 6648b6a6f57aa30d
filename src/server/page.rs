//! HTML status page served at `/`

const STYLE: &str = "body { font-family: Arial, sans-serif; margin: 40px; background: #f5f5f5; }
            .container { background: white; padding: 30px; border-radius: 10px; }
            h1 { color: #2e7d32; }
            .endpoint { background: #e8f5e9; padding: 15px; margin: 10px 0; border-radius: 5px; }";

const LINKS: [(&str, &str); 5] = [
    ("/health", "💚 Health Check"),
    ("/test", "🧪 Test Prediction"),
    ("/model-info", "📊 Model Information"),
    ("/debug-model", "🔍 Debug Model"),
    ("/metrics", "📈 Metrics"),
];

pub fn render(model_loaded: bool) -> String {
    let status = if model_loaded {
        "✅ Model Loaded"
    } else {
        "⚠️ Test Mode"
    };
    let links: String = LINKS
        .iter()
        .map(|(href, label)| {
            format!(
                "            <div class=\"endpoint\"><strong><a href=\"{}\">{}</a></strong></div>\n",
                href, label
            )
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html>
    <head>
        <title>Crop Recommendation API</title>
        <style>
            {style}
        </style>
    </head>
    <body>
        <div class="container">
            <h1>🌾 Smart Crop Recommendation API</h1>
            <p><strong>Status:</strong> {status}</p>
            <p>POST soil and climate observations to <code>/predict-crop</code>.</p>
{links}        </div>
    </body>
</html>
"#,
        style = STYLE,
        status = status,
        links = links
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_status() {
        assert!(render(true).contains("Model Loaded"));
        let page = render(false);
        assert!(page.contains("Test Mode"));
        assert!(page.contains("href=\"/debug-model\""));
    }
}
