//! Request processing for the embedded local endpoint.
//!
//! The CodeScan server UI can talk to a running IDE on localhost to check its
//! status and to open a security hotspot in the editor. The transport (socket
//! accept loop, HTTP framing) belongs to the host; this module implements the
//! request contract on top of it.

use serde::Serialize;
use tracing::{info, warn};
use url::Url;

pub const STATUS_ENDPOINT: &str = "/codescan/api/status";
pub const SHOW_HOTSPOT_ENDPOINT: &str = "/codescan/api/hotspots/show";

const PROJECT_PARAM: &str = "project";
const HOTSPOT_PARAM: &str = "hotspot";
const SERVER_PARAM: &str = "server";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// An incoming request, already decoded by the host transport.
#[derive(Debug, Clone)]
pub struct Request {
    uri: String,
    method: Method,
    /// Whether the Origin header matched a configured server connection.
    /// Untrusted callers only get a redacted status.
    trusted_origin: bool,
}

impl Request {
    pub fn new(uri: impl Into<String>, method: Method, trusted_origin: bool) -> Self {
        Self {
            uri: uri.into(),
            method,
            trusted_origin,
        }
    }

    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or(&self.uri)
    }

    pub fn parameter(&self, name: &str) -> Option<String> {
        let url = Url::parse(&format!("http://localhost{}", self.uri)).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Success(Option<String>),
    BadRequest(String),
}

/// What the status endpoint reports about this IDE instance.
#[derive(Debug, Clone, Default)]
pub struct IdeInfo {
    pub name: String,
    pub full_version: String,
    pub edition: Option<String>,
    pub open_projects: Vec<String>,
}

#[derive(Serialize)]
struct Status {
    #[serde(rename = "ideName")]
    ide_name: String,
    description: String,
}

/// Opens a hotspot in the editor. Implemented by the host; invoked on its
/// own dispatch thread.
pub trait ShowHotspotHandler: Send + Sync {
    fn open(&self, project_key: &str, hotspot_key: &str, server_url: &str);
}

pub struct RequestProcessor<H: ShowHotspotHandler> {
    ide: IdeInfo,
    handler: H,
}

impl<H: ShowHotspotHandler> RequestProcessor<H> {
    pub fn new(ide: IdeInfo, handler: H) -> Self {
        Self { ide, handler }
    }

    pub fn process(&self, request: &Request) -> Response {
        if request.path() == STATUS_ENDPOINT && request.method == Method::Get {
            return self.status(request.trusted_origin);
        }
        if request.path() == SHOW_HOTSPOT_ENDPOINT && request.method == Method::Get {
            return self.show_hotspot(request);
        }
        warn!(
            "Rejected request {:?} {}",
            request.method,
            request.path()
        );
        Response::BadRequest("Invalid path or method.".to_string())
    }

    fn status(&self, trusted_origin: bool) -> Response {
        let description = if trusted_origin {
            let mut description = self.ide.full_version.clone();
            if let Some(edition) = &self.ide.edition {
                description.push_str(&format!(" ({edition})"));
            }
            if !self.ide.open_projects.is_empty() {
                description.push_str(" - ");
                description.push_str(&self.ide.open_projects.join(", "));
            }
            description
        } else {
            String::new()
        };
        let status = Status {
            ide_name: self.ide.name.clone(),
            description,
        };
        match serde_json::to_string(&status) {
            Ok(body) => Response::Success(Some(body)),
            Err(e) => Response::BadRequest(format!("Failed to serialize status: {e}")),
        }
    }

    fn show_hotspot(&self, request: &Request) -> Response {
        let Some(project_key) = request.parameter(PROJECT_PARAM) else {
            return missing_parameter(PROJECT_PARAM);
        };
        let Some(hotspot_key) = request.parameter(HOTSPOT_PARAM) else {
            return missing_parameter(HOTSPOT_PARAM);
        };
        let Some(server_url) = request.parameter(SERVER_PARAM) else {
            return missing_parameter(SERVER_PARAM);
        };

        info!(
            "Opening hotspot '{hotspot_key}' of project '{project_key}' from {server_url}"
        );
        self.handler.open(&project_key, &hotspot_key, &server_url);
        Response::Success(None)
    }
}

fn missing_parameter(name: &str) -> Response {
    Response::BadRequest(format!("The '{name}' parameter is not specified"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingHandler {
        opened: Arc<Mutex<Vec<(String, String, String)>>>,
    }

    impl ShowHotspotHandler for RecordingHandler {
        fn open(&self, project_key: &str, hotspot_key: &str, server_url: &str) {
            self.opened.lock().unwrap().push((
                project_key.to_string(),
                hotspot_key.to_string(),
                server_url.to_string(),
            ));
        }
    }

    fn processor() -> (RequestProcessor<RecordingHandler>, RecordingHandler) {
        let handler = RecordingHandler::default();
        let ide = IdeInfo {
            name: "IntelliJ IDEA".to_string(),
            full_version: "2021.1".to_string(),
            edition: Some("Community".to_string()),
            open_projects: vec!["demo".to_string()],
        };
        (RequestProcessor::new(ide, handler.clone()), handler)
    }

    #[test]
    fn test_status_includes_details_for_trusted_origin() {
        let (processor, _) = processor();
        let response = processor.process(&Request::new(STATUS_ENDPOINT, Method::Get, true));
        match response {
            Response::Success(Some(body)) => {
                assert!(body.contains("IntelliJ IDEA"));
                assert!(body.contains("2021.1 (Community) - demo"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_status_redacted_for_untrusted_origin() {
        let (processor, _) = processor();
        let response = processor.process(&Request::new(STATUS_ENDPOINT, Method::Get, false));
        match response {
            Response::Success(Some(body)) => {
                assert!(body.contains("\"description\":\"\""));
                assert!(body.contains("IntelliJ IDEA"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_show_hotspot_dispatches_to_handler() {
        let (processor, handler) = processor();
        let uri = format!(
            "{SHOW_HOTSPOT_ENDPOINT}?project=org%3Aservice&hotspot=AX42&server=https%3A%2F%2Fsonar.internal"
        );
        let response = processor.process(&Request::new(uri, Method::Get, true));
        assert_eq!(response, Response::Success(None));

        let opened = handler.opened.lock().unwrap();
        assert_eq!(
            opened.as_slice(),
            &[(
                "org:service".to_string(),
                "AX42".to_string(),
                "https://sonar.internal".to_string()
            )]
        );
    }

    #[test]
    fn test_show_hotspot_reports_missing_parameter() {
        let (processor, handler) = processor();
        let uri = format!("{SHOW_HOTSPOT_ENDPOINT}?project=org%3Aservice&server=x");
        let response = processor.process(&Request::new(uri, Method::Get, true));
        assert_eq!(
            response,
            Response::BadRequest("The 'hotspot' parameter is not specified".to_string())
        );
        assert!(handler.opened.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_path_is_rejected() {
        let (processor, _) = processor();
        let response = processor.process(&Request::new("/codescan/api/nope", Method::Get, true));
        assert_eq!(
            response,
            Response::BadRequest("Invalid path or method.".to_string())
        );
    }

    #[test]
    fn test_post_to_status_is_rejected() {
        let (processor, _) = processor();
        let response = processor.process(&Request::new(STATUS_ENDPOINT, Method::Post, true));
        assert_eq!(
            response,
            Response::BadRequest("Invalid path or method.".to_string())
        );
    }
}
