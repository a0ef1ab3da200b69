//! MCP tool definitions and handlers.
//!
//! Each tool is defined as a JSON schema (returned by [`tool_definitions`]),
//! parsed into a [`ToolCall`] and executed against an [`RmmApi`] built for the
//! caller's credentials by [`handle_tool_call`].
//!
//! ## Tools
//!
//! - **Devices**: `list_devices`, `get_device`, `get_device_audit`
//! - **Alerts**: `list_alerts`, `resolve_alert`
//! - **Sites**: `list_sites`, `get_site`
//! - **Jobs**: `run_quickjob`
//!
//! Listing tools drain the upstream paged stream through
//! [`collect_bounded`], so `max` caps both the result and the pages fetched.
//!
//! Every failure (missing credentials, unknown tool, missing argument,
//! upstream error) comes back as a [`ToolResult`] with `is_error` set. Nothing
//! in this module returns an `Err` to the protocol layer.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::client::{ClientError, ClientFactory, QuickJob, RmmApi};
use crate::credentials::Credentials;
use crate::paging::{collect_bounded, DEFAULT_MAX};

/// Returned for every tool call when no credentials could be resolved.
pub const MISSING_CREDENTIALS: &str = "Error: Datto RMM credentials not configured. \
Set DATTO_API_KEY and DATTO_API_SECRET (or send X-Datto-API-Key and X-Datto-API-Secret \
headers in gateway mode).";

/// Returns the tool catalog advertised by `tools/list`.
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "list_devices",
            "description": "List devices in the Datto RMM account, or only the devices of one site when siteUid is given.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "siteUid": {
                        "type": "string",
                        "description": "Only list devices belonging to this site."
                    },
                    "max": {
                        "type": "number",
                        "description": "Maximum number of devices to return.",
                        "default": DEFAULT_MAX
                    }
                }
            }
        }),
        json!({
            "name": "get_device",
            "description": "Get details of a single device: hostname, OS, site, status, last seen, UDFs.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "deviceUid": {
                        "type": "string",
                        "description": "The device UID."
                    }
                },
                "required": ["deviceUid"]
            }
        }),
        json!({
            "name": "list_alerts",
            "description": "List open alerts across the account, or only the open alerts of one site when siteUid is given.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "siteUid": {
                        "type": "string",
                        "description": "Only list open alerts for this site."
                    },
                    "max": {
                        "type": "number",
                        "description": "Maximum number of alerts to return.",
                        "default": DEFAULT_MAX
                    }
                }
            }
        }),
        json!({
            "name": "resolve_alert",
            "description": "Mark an open alert as resolved.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "alertUid": {
                        "type": "string",
                        "description": "The alert UID."
                    }
                },
                "required": ["alertUid"]
            }
        }),
        json!({
            "name": "list_sites",
            "description": "List sites (customers/locations) in the Datto RMM account.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "max": {
                        "type": "number",
                        "description": "Maximum number of sites to return.",
                        "default": DEFAULT_MAX
                    }
                }
            }
        }),
        json!({
            "name": "get_site",
            "description": "Get details of a single site.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "siteUid": {
                        "type": "string",
                        "description": "The site UID."
                    }
                },
                "required": ["siteUid"]
            }
        }),
        json!({
            "name": "run_quickjob",
            "description": "Run a component as a quick job on a device. Returns the created job.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "deviceUid": {
                        "type": "string",
                        "description": "The device to run the job on."
                    },
                    "jobName": {
                        "type": "string",
                        "description": "Display name for the job."
                    },
                    "componentUid": {
                        "type": "string",
                        "description": "UID of the component to run."
                    },
                    "variables": {
                        "type": "object",
                        "description": "Component variables as name/value pairs.",
                        "additionalProperties": { "type": "string" }
                    }
                },
                "required": ["deviceUid", "jobName", "componentUid"]
            }
        }),
        json!({
            "name": "get_device_audit",
            "description": "Get the audit of a device: full hardware/OS/software inventory, or installed software only.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "deviceUid": {
                        "type": "string",
                        "description": "The device UID."
                    },
                    "auditType": {
                        "type": "string",
                        "enum": ["full", "software"],
                        "description": "Which audit to fetch.",
                        "default": "full"
                    }
                },
                "required": ["deviceUid"]
            }
        }),
    ]
}

/// Which device audit `get_device_audit` fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditType {
    Full,
    Software,
}

impl AuditType {
    /// `"software"` selects the software audit; anything else, including
    /// absent or unrecognized values, selects the full audit.
    pub fn from_arg(value: Option<&str>) -> AuditType {
        match value {
            Some("software") => AuditType::Software,
            _ => AuditType::Full,
        }
    }
}

/// A parsed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    ListDevices {
        site_uid: Option<String>,
        max: usize,
    },
    GetDevice {
        device_uid: String,
    },
    ListAlerts {
        site_uid: Option<String>,
        max: usize,
    },
    ResolveAlert {
        alert_uid: String,
    },
    ListSites {
        max: usize,
    },
    GetSite {
        site_uid: String,
    },
    RunQuickJob {
        device_uid: String,
        job: QuickJob,
    },
    GetDeviceAudit {
        device_uid: String,
        audit_type: AuditType,
    },
}

/// Why a tool call failed.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Missing required parameter: {0}")]
    MissingArgument(&'static str),
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl ToolCall {
    /// Parse a tool name and its arguments.
    pub fn parse(name: &str, args: &Value) -> Result<ToolCall, ToolError> {
        let call = match name {
            "list_devices" => ToolCall::ListDevices {
                site_uid: optional_str(args, "siteUid"),
                max: max_arg(args),
            },
            "get_device" => ToolCall::GetDevice {
                device_uid: required_str(args, "deviceUid")?,
            },
            "list_alerts" => ToolCall::ListAlerts {
                site_uid: optional_str(args, "siteUid"),
                max: max_arg(args),
            },
            "resolve_alert" => ToolCall::ResolveAlert {
                alert_uid: required_str(args, "alertUid")?,
            },
            "list_sites" => ToolCall::ListSites { max: max_arg(args) },
            "get_site" => ToolCall::GetSite {
                site_uid: required_str(args, "siteUid")?,
            },
            "run_quickjob" => ToolCall::RunQuickJob {
                device_uid: required_str(args, "deviceUid")?,
                job: QuickJob {
                    job_name: required_str(args, "jobName")?,
                    component_uid: required_str(args, "componentUid")?,
                    variables: variables_arg(args),
                },
            },
            "get_device_audit" => ToolCall::GetDeviceAudit {
                device_uid: required_str(args, "deviceUid")?,
                audit_type: AuditType::from_arg(args.get("auditType").and_then(Value::as_str)),
            },
            _ => return Err(ToolError::UnknownTool(name.to_string())),
        };
        Ok(call)
    }

    /// Execute against the upstream API. Upstream calls are made one at a time.
    pub async fn run(&self, api: &dyn RmmApi) -> Result<Value, ToolError> {
        let value = match self {
            ToolCall::ListDevices { site_uid, max } => {
                let devices = match site_uid {
                    Some(site) => collect_bounded(api.site_devices(site), *max).await?,
                    None => collect_bounded(api.account_devices(), *max).await?,
                };
                Value::Array(devices)
            }
            ToolCall::GetDevice { device_uid } => api.device(device_uid).await?,
            ToolCall::ListAlerts { site_uid, max } => {
                let alerts = match site_uid {
                    Some(site) => collect_bounded(api.site_open_alerts(site), *max).await?,
                    None => collect_bounded(api.account_open_alerts(), *max).await?,
                };
                Value::Array(alerts)
            }
            ToolCall::ResolveAlert { alert_uid } => match api.resolve_alert(alert_uid).await? {
                Value::Null => json!({ "success": true, "alertUid": alert_uid }),
                other => other,
            },
            ToolCall::ListSites { max } => {
                Value::Array(collect_bounded(api.account_sites(), *max).await?)
            }
            ToolCall::GetSite { site_uid } => api.site(site_uid).await?,
            ToolCall::RunQuickJob { device_uid, job } => {
                api.create_quick_job(device_uid, job).await?
            }
            ToolCall::GetDeviceAudit {
                device_uid,
                audit_type,
            } => match audit_type {
                AuditType::Software => api.device_software_audit(device_uid).await?,
                AuditType::Full => api.device_audit(device_uid).await?,
            },
        };
        Ok(value)
    }
}

fn optional_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn required_str(args: &Value, key: &'static str) -> Result<String, ToolError> {
    optional_str(args, key).ok_or(ToolError::MissingArgument(key))
}

/// `max` as a non-negative count; absent or non-numeric values use the default.
fn max_arg(args: &Value) -> usize {
    match args.get("max") {
        Some(v) if v.is_u64() => v.as_u64().map_or(DEFAULT_MAX, |n| {
            usize::try_from(n).unwrap_or(usize::MAX)
        }),
        Some(v) if v.is_number() => v
            .as_f64()
            .filter(|n| n.is_finite())
            .map_or(DEFAULT_MAX, |n| n.max(0.0) as usize),
        _ => DEFAULT_MAX,
    }
}

/// Component variables; non-string scalars are rendered as JSON text.
fn variables_arg(args: &Value) -> BTreeMap<String, String> {
    args.get("variables")
        .and_then(Value::as_object)
        .map(|vars| {
            vars.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| {
                    let value = v.as_str().map_or_else(|| v.to_string(), String::from);
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Handle a tool call and return MCP content.
///
/// Credentials are checked before anything else; without them no client is
/// constructed. Arguments are parsed before the client is built, so unknown
/// tools and missing arguments never touch the network either.
pub async fn handle_tool_call(
    name: &str,
    args: &Value,
    credentials: Option<&Credentials>,
    factory: &dyn ClientFactory,
) -> ToolResult {
    let Some(credentials) = credentials else {
        warn!(tool = name, "tool call without credentials");
        return ToolResult::error(MISSING_CREDENTIALS.to_string());
    };

    match execute(name, args, credentials, factory).await {
        Ok(value) => {
            debug!(tool = name, "tool call succeeded");
            ToolResult::success(&value)
        }
        Err(e) => {
            warn!(tool = name, error = %e, "tool call failed");
            ToolResult::from_error(&e)
        }
    }
}

async fn execute(
    name: &str,
    args: &Value,
    credentials: &Credentials,
    factory: &dyn ClientFactory,
) -> Result<Value, ToolError> {
    let call = ToolCall::parse(name, args)?;
    let api = factory.connect(credentials)?;
    call.run(api.as_ref()).await
}

/// Result of an MCP tool call, ready to be serialized into a JSON-RPC response.
#[derive(Debug)]
pub struct ToolResult {
    /// MCP content blocks (a single `{"type":"text","text":"..."}` entry).
    pub content: Vec<Value>,
    /// Whether the tool call failed (maps to `isError` in the MCP response).
    pub is_error: bool,
}

impl ToolResult {
    fn success(value: &Value) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_default();
        Self {
            content: vec![json!({ "type": "text", "text": text })],
            is_error: false,
        }
    }

    fn error(message: String) -> Self {
        Self {
            content: vec![json!({ "type": "text", "text": message })],
            is_error: true,
        }
    }

    fn from_error(err: &ToolError) -> Self {
        match err {
            ToolError::UnknownTool(_) => Self::error(err.to_string()),
            _ => Self::error(format!("Error: {err}")),
        }
    }

    /// The `result` object of a `tools/call` response.
    pub fn to_json(&self) -> Value {
        let mut result = json!({ "content": self.content });
        if self.is_error {
            result["isError"] = json!(true);
        }
        result
    }

    /// Text of the first content block.
    pub fn text(&self) -> &str {
        self.content
            .first()
            .and_then(|c| c["text"].as_str())
            .unwrap_or("")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use futures::stream::{self, BoxStream, StreamExt};

    use super::*;
    use crate::credentials::Platform;

    /// Shared log of what the fake client was asked to do.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub calls: Mutex<Vec<String>>,
        pub connects: AtomicUsize,
        pub pulled: AtomicUsize,
        pub connected_with: Mutex<Vec<Credentials>>,
    }

    impl Recorder {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    struct FakeApi {
        rec: Arc<Recorder>,
        fail_with: Option<String>,
    }

    impl FakeApi {
        /// An endless listing of `{"uid": "<prefix>-<n>"}` items.
        fn listing(&self, call: String, prefix: &'static str) -> BoxStream<'_, Result<Value, ClientError>> {
            self.rec.record(call);
            let rec = self.rec.clone();
            stream::iter(0..)
                .map(move |i| {
                    rec.pulled.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({ "uid": format!("{prefix}-{i}") }))
                })
                .boxed()
        }

        fn single(&self, call: String, ok: Value) -> Result<Value, ClientError> {
            self.rec.record(call);
            match &self.fail_with {
                Some(message) => Err(ClientError::Api {
                    status: 404,
                    message: message.clone(),
                }),
                None => Ok(ok),
            }
        }
    }

    #[async_trait]
    impl RmmApi for FakeApi {
        fn account_devices(&self) -> BoxStream<'_, Result<Value, ClientError>> {
            self.listing("account_devices".into(), "dev")
        }

        fn site_devices(&self, site_uid: &str) -> BoxStream<'_, Result<Value, ClientError>> {
            self.listing(format!("site_devices:{site_uid}"), "dev")
        }

        async fn device(&self, device_uid: &str) -> Result<Value, ClientError> {
            self.single(format!("device:{device_uid}"), json!({ "uid": device_uid }))
        }

        fn account_open_alerts(&self) -> BoxStream<'_, Result<Value, ClientError>> {
            self.listing("account_open_alerts".into(), "alert")
        }

        fn site_open_alerts(&self, site_uid: &str) -> BoxStream<'_, Result<Value, ClientError>> {
            self.listing(format!("site_open_alerts:{site_uid}"), "alert")
        }

        async fn resolve_alert(&self, alert_uid: &str) -> Result<Value, ClientError> {
            self.single(format!("resolve_alert:{alert_uid}"), Value::Null)
        }

        fn account_sites(&self) -> BoxStream<'_, Result<Value, ClientError>> {
            self.listing("account_sites".into(), "site")
        }

        async fn site(&self, site_uid: &str) -> Result<Value, ClientError> {
            self.single(format!("site:{site_uid}"), json!({ "uid": site_uid }))
        }

        async fn create_quick_job(
            &self,
            device_uid: &str,
            job: &QuickJob,
        ) -> Result<Value, ClientError> {
            let vars: Vec<String> = job
                .variables
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            self.single(
                format!(
                    "create_quick_job:{device_uid}:{}:{}:{}",
                    job.job_name,
                    job.component_uid,
                    vars.join(",")
                ),
                json!({ "job": { "uid": "job-1", "status": "active" } }),
            )
        }

        async fn device_audit(&self, device_uid: &str) -> Result<Value, ClientError> {
            self.single(format!("device_audit:{device_uid}"), json!({ "audit": "full" }))
        }

        async fn device_software_audit(&self, device_uid: &str) -> Result<Value, ClientError> {
            self.single(
                format!("device_software_audit:{device_uid}"),
                json!({ "software": [] }),
            )
        }
    }

    pub(crate) struct FakeFactory {
        pub rec: Arc<Recorder>,
        pub fail_with: Option<String>,
    }

    impl FakeFactory {
        pub fn new() -> Self {
            Self {
                rec: Arc::new(Recorder::default()),
                fail_with: None,
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                rec: Arc::new(Recorder::default()),
                fail_with: Some(message.to_string()),
            }
        }
    }

    impl ClientFactory for FakeFactory {
        fn connect(&self, credentials: &Credentials) -> Result<Box<dyn RmmApi>, ClientError> {
            self.rec.connects.fetch_add(1, Ordering::SeqCst);
            self.rec
                .connected_with
                .lock()
                .unwrap()
                .push(credentials.clone());
            Ok(Box::new(FakeApi {
                rec: self.rec.clone(),
                fail_with: self.fail_with.clone(),
            }))
        }
    }

    pub(crate) fn creds() -> Credentials {
        Credentials {
            api_key: "key".into(),
            api_secret: "secret".into(),
            platform: Platform::Concord,
        }
    }

    async fn call(factory: &FakeFactory, name: &str, args: Value) -> ToolResult {
        handle_tool_call(name, &args, Some(&creds()), factory).await
    }

    fn parsed(result: &ToolResult) -> Value {
        assert!(!result.is_error, "unexpected error: {}", result.text());
        serde_json::from_str(result.text()).unwrap()
    }

    #[test]
    fn catalog_has_the_eight_tools() {
        let names: Vec<String> = tool_definitions()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "list_devices",
                "get_device",
                "list_alerts",
                "resolve_alert",
                "list_sites",
                "get_site",
                "run_quickjob",
                "get_device_audit"
            ]
        );
    }

    #[test]
    fn catalog_schemas_carry_required_fields_and_defaults() {
        let defs = tool_definitions();
        let find = |name: &str| defs.iter().find(|t| t["name"] == name).unwrap().clone();

        assert_eq!(
            find("run_quickjob")["inputSchema"]["required"],
            json!(["deviceUid", "jobName", "componentUid"])
        );
        assert_eq!(
            find("get_device_audit")["inputSchema"]["properties"]["auditType"]["enum"],
            json!(["full", "software"])
        );
        assert_eq!(
            find("list_sites")["inputSchema"]["properties"]["max"]["default"],
            json!(50)
        );
        assert!(find("list_devices")["inputSchema"].get("required").is_none());
    }

    #[test]
    fn audit_type_soft_fallback() {
        assert_eq!(AuditType::from_arg(Some("software")), AuditType::Software);
        assert_eq!(AuditType::from_arg(Some("full")), AuditType::Full);
        assert_eq!(AuditType::from_arg(Some("hardware")), AuditType::Full);
        assert_eq!(AuditType::from_arg(None), AuditType::Full);
    }

    #[test]
    fn max_argument_parsing() {
        assert_eq!(max_arg(&json!({})), 50);
        assert_eq!(max_arg(&json!({ "max": 7 })), 7);
        assert_eq!(max_arg(&json!({ "max": 7.9 })), 7);
        assert_eq!(max_arg(&json!({ "max": -3 })), 0);
        assert_eq!(max_arg(&json!({ "max": "ten" })), 50);
    }

    #[test]
    fn parse_unknown_tool() {
        let err = ToolCall::parse("reboot_everything", &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(ref n) if n == "reboot_everything"));
    }

    #[tokio::test]
    async fn list_devices_with_site_uses_site_scope_only() {
        let factory = FakeFactory::new();
        let result = call(&factory, "list_devices", json!({ "siteUid": "site-9" })).await;
        assert_eq!(parsed(&result).as_array().unwrap().len(), 50);
        assert_eq!(factory.rec.calls(), ["site_devices:site-9"]);
    }

    #[tokio::test]
    async fn list_devices_without_site_uses_account_scope_only() {
        let factory = FakeFactory::new();
        let result = call(&factory, "list_devices", json!({ "max": 3 })).await;
        let devices = parsed(&result);
        assert_eq!(devices, json!([{ "uid": "dev-0" }, { "uid": "dev-1" }, { "uid": "dev-2" }]));
        assert_eq!(factory.rec.calls(), ["account_devices"]);
        assert_eq!(factory.rec.pulled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn list_alerts_scopes_by_site() {
        let factory = FakeFactory::new();
        call(&factory, "list_alerts", json!({ "siteUid": "s1", "max": 1 })).await;
        call(&factory, "list_alerts", json!({ "max": 1 })).await;
        assert_eq!(
            factory.rec.calls(),
            ["site_open_alerts:s1", "account_open_alerts"]
        );
    }

    #[tokio::test]
    async fn list_sites_with_zero_max_pulls_nothing() {
        let factory = FakeFactory::new();
        let result = call(&factory, "list_sites", json!({ "max": 0 })).await;
        assert_eq!(parsed(&result), json!([]));
        assert_eq!(factory.rec.pulled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn get_device_audit_switches_on_audit_type() {
        let factory = FakeFactory::new();
        call(&factory, "get_device_audit", json!({ "deviceUid": "d1", "auditType": "software" })).await;
        call(&factory, "get_device_audit", json!({ "deviceUid": "d2", "auditType": "bogus" })).await;
        call(&factory, "get_device_audit", json!({ "deviceUid": "d3" })).await;
        assert_eq!(
            factory.rec.calls(),
            ["device_software_audit:d1", "device_audit:d2", "device_audit:d3"]
        );
    }

    #[tokio::test]
    async fn run_quickjob_forwards_job_and_variables() {
        let factory = FakeFactory::new();
        let result = call(
            &factory,
            "run_quickjob",
            json!({
                "deviceUid": "d1",
                "jobName": "Clear temp",
                "componentUid": "c1",
                "variables": { "path": "C:\\Temp", "days": 7 }
            }),
        )
        .await;
        assert_eq!(parsed(&result)["job"]["uid"], "job-1");
        assert_eq!(
            factory.rec.calls(),
            ["create_quick_job:d1:Clear temp:c1:days=7,path=C:\\Temp"]
        );
    }

    #[tokio::test]
    async fn resolve_alert_with_empty_body_reports_success() {
        let factory = FakeFactory::new();
        let result = call(&factory, "resolve_alert", json!({ "alertUid": "a1" })).await;
        assert_eq!(parsed(&result), json!({ "success": true, "alertUid": "a1" }));
    }

    #[tokio::test]
    async fn get_site_and_get_device_return_upstream_json() {
        let factory = FakeFactory::new();
        let site = call(&factory, "get_site", json!({ "siteUid": "s1" })).await;
        let device = call(&factory, "get_device", json!({ "deviceUid": "d1" })).await;
        assert_eq!(parsed(&site)["uid"], "s1");
        assert_eq!(parsed(&device)["uid"], "d1");
        assert_eq!(factory.rec.calls(), ["site:s1", "device:d1"]);
    }

    #[tokio::test]
    async fn success_text_is_indented_json() {
        let factory = FakeFactory::new();
        let result = call(&factory, "get_device", json!({ "deviceUid": "d1" })).await;
        assert_eq!(result.text(), "{\n  \"uid\": \"d1\"\n}");
        assert!(result.to_json().get("isError").is_none());
    }

    #[tokio::test]
    async fn missing_credentials_short_circuit_every_tool() {
        let factory = FakeFactory::new();
        for def in tool_definitions() {
            let name = def["name"].as_str().unwrap();
            let result = handle_tool_call(name, &json!({}), None, &factory).await;
            assert!(result.is_error);
            assert_eq!(result.text(), MISSING_CREDENTIALS);
        }
        let result = handle_tool_call("nope", &json!({}), None, &factory).await;
        assert_eq!(result.text(), MISSING_CREDENTIALS);
        assert_eq!(factory.rec.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_tool_is_in_band_error() {
        let factory = FakeFactory::new();
        let result = call(&factory, "nope", json!({})).await;
        assert!(result.is_error);
        assert_eq!(result.text(), "Unknown tool: nope");
        assert_eq!(
            result.to_json(),
            json!({
                "content": [{ "type": "text", "text": "Unknown tool: nope" }],
                "isError": true
            })
        );
        assert_eq!(factory.rec.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upstream_error_surfaces_as_message() {
        let factory = FakeFactory::failing("Device not found");
        let result = call(&factory, "get_device", json!({ "deviceUid": "missing" })).await;
        assert!(result.is_error);
        assert_eq!(result.content, vec![json!({ "type": "text", "text": "Error: Device not found" })]);
    }

    #[tokio::test]
    async fn missing_required_argument_is_reported() {
        let factory = FakeFactory::new();
        let result = call(&factory, "run_quickjob", json!({ "deviceUid": "d1" })).await;
        assert!(result.is_error);
        assert_eq!(result.text(), "Error: Missing required parameter: jobName");
        assert_eq!(factory.rec.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn client_is_built_with_the_callers_credentials() {
        let factory = FakeFactory::new();
        let tenant = Credentials {
            api_key: "tenant-a".into(),
            api_secret: "secret-a".into(),
            platform: Platform::Syrah,
        };
        handle_tool_call("list_sites", &json!({ "max": 1 }), Some(&tenant), &factory).await;
        assert_eq!(*factory.rec.connected_with.lock().unwrap(), vec![tenant]);
    }
}
