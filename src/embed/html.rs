//! Iframe markup for chart artifacts.

use html_escape::encode_double_quoted_attribute;
use serde::Serialize;

use super::EmbedConfig;
use crate::chart::{ChartDocument, LinkedInteractionSpec, SizingPolicy, TitleAnnotationFallback};
use crate::error::ChartResult;

const CHART_RUNTIME: &str = include_str!("chart_runtime.js");

/// Everything the client runtime needs, serialized into the frame
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootPayload<'a> {
    pub artifact_id: &'a str,
    pub document: &'a ChartDocument,
    pub sizing: &'a SizingPolicy,
    pub linked: Option<&'a LinkedInteractionSpec>,
    pub title_fallback: TitleAnnotationFallback,
}

impl BootPayload<'_> {
    /// JSON safe to inline inside a `<script>` element
    pub fn to_script_json(&self) -> ChartResult<String> {
        let json = serde_json::to_string(self)?;
        Ok(json
            .replace("</", "<\\/")
            .replace('\u{2028}', "\\u2028")
            .replace('\u{2029}', "\\u2029"))
    }
}

fn srcdoc(payload: &BootPayload<'_>, config: &EmbedConfig) -> ChartResult<String> {
    Ok(format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"/>\
         <meta name=\"viewport\" content=\"width=device-width,initial-scale=1\"/>\
         <style>html,body{{margin:0;padding:0;background:#fff;overflow:hidden;}}\
         #plot-wrap{{width:100%;max-width:100%;margin:0;}}</style>\
         </head><body>\
         <div id=\"plot-wrap\"><div id=\"plot-root\" style=\"width:100%;\"></div></div>\
         <script src=\"{library}\"></script>\
         <script>window.__CHART_BOOT__={boot};</script>\
         <script>{runtime}</script>\
         </body></html>",
        library = encode_double_quoted_attribute(&config.library_url),
        boot = payload.to_script_json()?,
        runtime = CHART_RUNTIME,
    ))
}

/// Wrap a prepared document in a sandboxed iframe of `initial_height` pixels.
pub fn wrap_document(
    payload: &BootPayload<'_>,
    initial_height: f64,
    config: &EmbedConfig,
) -> ChartResult<String> {
    let doc = srcdoc(payload, config)?;
    let height = initial_height.round();
    Ok(format!(
        "<iframe data-artifact-id=\"{id}\" sandbox=\"{sandbox}\" srcdoc=\"{doc}\" \
         height=\"{height}\" style=\"width:100%;max-width:100%;height:{height}px;border:0;display:block;\" \
         title=\"{title}\"></iframe>",
        id = encode_double_quoted_attribute(payload.artifact_id),
        sandbox = encode_double_quoted_attribute(&config.iframe_sandbox),
        doc = encode_double_quoted_attribute(&doc),
        height = height,
        title = encode_double_quoted_attribute(&config.iframe_title),
    ))
}

/// Host-page script applying `chart:resize` messages to the sending frame.
pub fn host_listener() -> &'static str {
    "<script>(function(){if(window.__chartResizeListener)return;window.__chartResizeListener=true;\
     window.addEventListener('message',function(e){var d=e.data;\
     if(!d||d.kind!=='chart:resize'||typeof d.height!=='number')return;\
     var frames=document.querySelectorAll('iframe[data-artifact-id]');\
     for(var i=0;i<frames.length;i++){var f=frames[i];\
     if(f.getAttribute('data-artifact-id')===String(d.artifactId)&&f.contentWindow===e.source){\
     f.style.height=d.height+'px';f.height=String(d.height);}}});})();</script>"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::SizingConfig;
    use serde_json::json;

    fn document() -> ChartDocument {
        serde_json::from_value(json!({
            "data": [{"type": "bar", "x": ["a"], "y": [1], "name": "</script><script>alert(1)</script>"}],
            "layout": {}
        }))
        .unwrap()
    }

    #[test]
    fn test_boot_payload_cannot_close_its_script() {
        let doc = document();
        let sizing = SizingPolicy::Responsive(SizingConfig::default());
        let payload = BootPayload {
            artifact_id: "abc",
            document: &doc,
            sizing: &sizing,
            linked: None,
            title_fallback: TitleAnnotationFallback::default(),
        };
        let json = payload.to_script_json().unwrap();
        assert!(!json.contains("</script>"));
        assert!(json.contains("\"artifactId\":\"abc\""));
        assert!(json.contains("\"mode\":\"responsive\""));
    }

    #[test]
    fn test_iframe_is_sandboxed_and_sized() {
        let doc = document();
        let sizing = SizingPolicy::Fixed { height: 500.0 };
        let payload = BootPayload {
            artifact_id: "abc",
            document: &doc,
            sizing: &sizing,
            linked: None,
            title_fallback: TitleAnnotationFallback::default(),
        };
        let markup = wrap_document(&payload, 500.0, &EmbedConfig::default()).unwrap();
        assert!(markup.starts_with("<iframe data-artifact-id=\"abc\" sandbox=\"allow-scripts\""));
        assert!(markup.contains("height=\"500\""));
        assert!(markup.contains("height:500px"));
        assert!(markup.contains("plotly-2.35.2.min.js"));
        // The whole document lives in one attribute.
        assert!(!markup.contains("<script"));
    }
}
