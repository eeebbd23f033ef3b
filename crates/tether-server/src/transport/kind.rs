//! The closed set of wire mechanisms and their frame encodings.

use tether_settings::TransportName;

/// Bytes of `h` written before anything else on an XHR stream, so that
/// browsers which buffer the first chunk start delivering.
const XHR_STREAMING_PRELUDE_LEN: usize = 2048;

/// The htmlfile document is padded to this many bytes for the same reason.
const HTMLFILE_PRELUDE_LEN: usize = 1024;

/// Which wire mechanism a handler speaks.
///
/// Chosen once per request by the route that matched; everything
/// variant-specific about writing frames lives here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// Full-duplex WebSocket; one text message per frame.
    Websocket,
    /// One request, one flush.
    XhrPolling,
    /// Newline-delimited frames on a long-lived POST response.
    XhrStreaming,
    /// Server-sent events.
    EventSource,
    /// One request, one flush, wrapped in a client-supplied callback.
    JsonpPolling {
        /// Validated callback name.
        callback: String,
    },
    /// Script tags streamed into a hidden iframe document.
    HtmlFile {
        /// Validated callback name.
        callback: String,
    },
}

impl TransportKind {
    /// Settings name of this variant.
    pub fn name(&self) -> TransportName {
        match self {
            Self::Websocket => TransportName::Websocket,
            Self::XhrPolling => TransportName::XhrPolling,
            Self::XhrStreaming => TransportName::XhrStreaming,
            Self::EventSource => TransportName::Eventsource,
            Self::JsonpPolling { .. } => TransportName::JsonpPolling,
            Self::HtmlFile { .. } => TransportName::Htmlfile,
        }
    }

    /// Polling variants end the response after a single frame.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::XhrPolling | Self::JsonpPolling { .. })
    }

    /// Streaming variants end the response once their byte/time budget is spent.
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            Self::XhrStreaming | Self::EventSource | Self::HtmlFile { .. }
        )
    }

    /// `Content-Type` of the HTTP response body.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Websocket | Self::XhrPolling | Self::XhrStreaming | Self::JsonpPolling { .. } => {
                "application/javascript; charset=UTF-8"
            }
            Self::EventSource => "text/event-stream; charset=UTF-8",
            Self::HtmlFile { .. } => "text/html; charset=UTF-8",
        }
    }

    /// Text written at the start of the response, before any frame.
    pub fn prelude(&self) -> Option<String> {
        match self {
            Self::XhrStreaming => {
                let mut out = "h".repeat(XHR_STREAMING_PRELUDE_LEN);
                out.push('\n');
                Some(out)
            }
            Self::EventSource => Some("\r\n".to_owned()),
            Self::HtmlFile { callback } => Some(htmlfile_prelude(callback)),
            Self::Websocket | Self::XhrPolling | Self::JsonpPolling { .. } => None,
        }
    }

    /// Wrap one encoded frame for this wire mechanism.
    pub fn send_pack(&self, frame: &str) -> String {
        match self {
            Self::Websocket => frame.to_owned(),
            Self::XhrPolling | Self::XhrStreaming => format!("{frame}\n"),
            Self::EventSource => format!("data: {frame}\r\n\r\n"),
            Self::JsonpPolling { callback } => {
                format!("/**/{callback}({});\r\n", js_string(frame))
            }
            Self::HtmlFile { .. } => {
                format!("<script>\np({});\n</script>\r\n", js_string(frame))
            }
        }
    }
}

/// Quote `text` as a JavaScript string literal that is also safe inside an
/// HTML `<script>` element.
fn js_string(text: &str) -> String {
    serde_json::Value::String(text.to_owned())
        .to_string()
        .replace('<', "\\u003c")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

fn htmlfile_prelude(callback: &str) -> String {
    let mut page = format!(
        r#"<!doctype html>
<html><head>
  <meta http-equiv="X-UA-Compatible" content="IE=edge" />
  <meta http-equiv="Content-Type" content="text/html; charset=UTF-8" />
</head><body><h2>Don't panic!</h2>
  <script>
    document.domain = document.domain;
    var c = parent.{callback};
    c.start();
    function p(d) {{c.message(d);}};
    window.onload = function() {{c.stop();}};
  </script>"#
    );
    if page.len() < HTMLFILE_PRELUDE_LEN {
        page.push_str(&" ".repeat(HTMLFILE_PRELUDE_LEN - page.len()));
    }
    page.push_str("\r\n");
    page
}
