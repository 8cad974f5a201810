//! Salesforce backend queried with SOQL.
//!
//! Login uses the partner SOAP endpoint (username plus password with the
//! security token appended). Queries and metadata go through the REST API with
//! the returned session id as bearer token.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use common::config::SchemaLimits;
use common::errors::{AppError, AppResult};
use common::models::{BackendKind, ColumnInfo, CredentialField, Credentials, QueryResult};
use common::utils::escape_markup;

use super::{ConnectionHandle, Connector, TableSchema};

const API_VERSION: &str = "59.0";

/// Standard objects described first, in this order.
const PREFERRED_OBJECTS: &[&str] = &[
    "Account",
    "Contact",
    "Lead",
    "Opportunity",
    "Case",
    "Campaign",
    "User",
    "Task",
    "Event",
    "Product2",
];

/// Fields selected per object when sampling rows.
const SAMPLE_FIELD_LIMIT: usize = 20;

static SESSION_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(?:\w+:)?sessionId>([^<]+)</(?:\w+:)?sessionId>").expect("valid regex")
});
static SERVER_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(?:\w+:)?serverUrl>(https?://[^/<]+)").expect("valid regex")
});
static FAULT_STRING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(?:\w+:)?faultstring>([^<]*)</(?:\w+:)?faultstring>").expect("valid regex")
});

pub struct SalesforceConnector;

#[async_trait]
impl Connector for SalesforceConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::Salesforce
    }

    /// `location` is the org's instance or login URL.
    async fn open(
        &self,
        location: &str,
        credentials: &Credentials,
    ) -> AppResult<Box<dyn ConnectionHandle>> {
        let username = credentials.require(self.kind(), CredentialField::Username)?;
        let password = credentials.require(self.kind(), CredentialField::Password)?;
        let token = credentials.require(self.kind(), CredentialField::SecurityToken)?;

        let login_url = instance_url(location)?;
        let client = reqwest::Client::new();
        let response = client
            .post(format!("{}/services/Soap/u/{}", login_url, API_VERSION))
            .header("Content-Type", "text/xml; charset=UTF-8")
            .header("SOAPAction", "login")
            .body(login_envelope(username, password, token))
            .send()
            .await
            .map_err(connection_error)?;

        let status = response.status();
        let body = response.text().await.map_err(connection_error)?;
        let login = parse_login_response(&body).map_err(|message| {
            connection_error(format!("login rejected (HTTP {}): {}", status, message))
        })?;

        tracing::debug!(instance = ?login.instance_url, "salesforce session established");
        Ok(Box::new(SalesforceHandle {
            session: Some(Session {
                client,
                instance_url: login.instance_url.unwrap_or(login_url),
                session_id: login.session_id,
            }),
        }))
    }
}

fn connection_error(e: impl ToString) -> AppError {
    AppError::connection(BackendKind::Salesforce, e)
}

fn instance_url(location: &str) -> AppResult<String> {
    let location = location.trim().trim_end_matches('/');
    if location.is_empty() {
        return Err(connection_error("missing instance URL"));
    }
    if location.starts_with("https://") || location.starts_with("http://") {
        Ok(location.to_string())
    } else {
        Ok(format!("https://{}", location))
    }
}

fn login_envelope(username: &str, password: &str, security_token: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8" ?>
<env:Envelope xmlns:xsd="http://www.w3.org/2001/XMLSchema"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xmlns:env="http://schemas.xmlsoap.org/soap/envelope/"
    xmlns:urn="urn:partner.soap.sforce.com">
  <env:Body>
    <urn:login>
      <urn:username>{}</urn:username>
      <urn:password>{}{}</urn:password>
    </urn:login>
  </env:Body>
</env:Envelope>"#,
        escape_markup(username),
        escape_markup(password),
        escape_markup(security_token)
    )
}

#[derive(Debug, PartialEq)]
struct LoginResult {
    session_id: String,
    instance_url: Option<String>,
}

/// Extracts the session from a SOAP login response, or the fault text.
fn parse_login_response(body: &str) -> Result<LoginResult, String> {
    if let Some(session_id) = SESSION_ID.captures(body).map(|c| c[1].to_string()) {
        return Ok(LoginResult {
            session_id,
            instance_url: SERVER_URL.captures(body).map(|c| c[1].to_string()),
        });
    }
    Err(FAULT_STRING
        .captures(body)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| body.chars().take(200).collect()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryPage {
    #[serde(default)]
    total_size: u64,
    #[serde(default)]
    records: Vec<Map<String, Value>>,
    #[serde(default)]
    next_records_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorEntry {
    #[serde(default)]
    error_code: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SObjectList {
    sobjects: Vec<SObjectSummary>,
}

#[derive(Debug, Deserialize)]
struct SObjectSummary {
    name: String,
    #[serde(default)]
    queryable: bool,
    #[serde(default)]
    custom: bool,
}

#[derive(Debug, Deserialize)]
struct SObjectDescribe {
    fields: Vec<FieldDescribe>,
}

#[derive(Debug, Deserialize)]
struct FieldDescribe {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
}

/// REST error bodies are arrays of `{message, errorCode}`.
fn api_errors(body: &str) -> String {
    match serde_json::from_str::<Vec<ApiErrorEntry>>(body) {
        Ok(entries) if !entries.is_empty() => entries
            .into_iter()
            .map(|e| match e.error_code {
                Some(code) => format!("{}: {}", code, e.message),
                None => e.message,
            })
            .collect::<Vec<_>>()
            .join("; "),
        _ => body.to_string(),
    }
}

/// Orders queryable objects: well-known standard objects, then custom
/// objects, then the rest alphabetically.
fn pick_objects(objects: Vec<SObjectSummary>, max_tables: usize) -> Vec<String> {
    let mut queryable: Vec<SObjectSummary> = objects.into_iter().filter(|o| o.queryable).collect();
    queryable.sort_by_cached_key(|o| {
        let preferred = PREFERRED_OBJECTS.iter().position(|p| *p == o.name);
        let group = match (preferred, o.custom) {
            (Some(_), _) => 0,
            (None, true) => 1,
            (None, false) => 2,
        };
        (group, preferred.unwrap_or(usize::MAX), o.name.clone())
    });
    queryable
        .into_iter()
        .take(max_tables)
        .map(|o| o.name)
        .collect()
}

/// Turns SOQL records into rows. Relationship objects are flattened into
/// dotted columns (`Account.Name`); `attributes` entries are dropped.
fn records_to_result(records: Vec<Map<String, Value>>, total_size: u64) -> QueryResult {
    if records.is_empty() {
        // COUNT() queries report their answer only in totalSize.
        if total_size > 0 {
            return QueryResult {
                columns: vec![ColumnInfo::new("count", "int")],
                rows: vec![vec![Value::from(total_size)]],
            };
        }
        return QueryResult::default();
    }

    let flattened: Vec<Vec<(String, Value)>> = records
        .into_iter()
        .map(|record| {
            let mut fields = Vec::new();
            flatten_record("", record, &mut fields);
            fields
        })
        .collect();

    let mut columns: Vec<ColumnInfo> = Vec::new();
    for record in &flattened {
        for (name, value) in record {
            if !columns.iter().any(|c| &c.name == name) {
                columns.push(ColumnInfo::new(name.as_str(), json_type(value)));
            }
        }
    }

    let rows = flattened
        .into_iter()
        .map(|record| {
            columns
                .iter()
                .map(|c| {
                    record
                        .iter()
                        .find(|(name, _)| name == &c.name)
                        .map(|(_, v)| v.clone())
                        .unwrap_or(Value::Null)
                })
                .collect()
        })
        .collect();

    QueryResult { columns, rows }
}

fn flatten_record(prefix: &str, record: Map<String, Value>, out: &mut Vec<(String, Value)>) {
    for (key, value) in record {
        if key == "attributes" {
            continue;
        }
        let name = if prefix.is_empty() {
            key
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) if inner.contains_key("attributes") => {
                flatten_record(&name, inner, out)
            }
            other => out.push((name, other)),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) | Value::Object(_) => "object",
        Value::Null => "",
    }
}

struct Session {
    client: reqwest::Client,
    instance_url: String,
    session_id: String,
}

impl Session {
    fn data_url(&self, path: &str) -> String {
        format!("{}/services/data/v{}{}", self.instance_url, API_VERSION, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> AppResult<T> {
        let response = request
            .bearer_auth(&self.session_id)
            .send()
            .await
            .map_err(|e| AppError::ExecutionFailed(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ExecutionFailed(format!(
                "HTTP {}: {}",
                status,
                api_errors(&text)
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::ExecutionFailed(format!("invalid response: {}", e)))
    }

    async fn query(&self, soql: &str) -> AppResult<QueryResult> {
        let request = self.client.get(self.data_url("/query")).query(&[("q", soql)]);
        let mut page: QueryPage = self.get_json(request).await?;
        let total_size = page.total_size;
        let mut records = std::mem::take(&mut page.records);

        while let Some(next) = page.next_records_url.take() {
            let request = self.client.get(format!("{}{}", self.instance_url, next));
            page = self.get_json(request).await?;
            records.append(&mut page.records);
        }
        Ok(records_to_result(records, total_size))
    }

    async fn revoke(&self) -> AppResult<()> {
        self.client
            .post(format!("{}/services/oauth2/revoke", self.instance_url))
            .form(&[("token", self.session_id.as_str())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::Internal(format!("revoking salesforce session: {}", e)))?;
        Ok(())
    }
}

struct SalesforceHandle {
    session: Option<Session>,
}

impl SalesforceHandle {
    fn session(&self) -> AppResult<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| AppError::Internal("salesforce session already closed".into()))
    }
}

#[async_trait]
impl ConnectionHandle for SalesforceHandle {
    fn dialect(&self) -> &'static str {
        "SOQL (Salesforce Object Query Language)"
    }

    async fn describe_tables(&mut self, limits: &SchemaLimits) -> AppResult<Vec<TableSchema>> {
        let session = self.session()?;
        let listing: SObjectList = session
            .get_json(session.client.get(session.data_url("/sobjects")))
            .await?;

        let mut tables = Vec::new();
        for name in pick_objects(listing.sobjects, limits.max_tables) {
            let describe: SObjectDescribe = session
                .get_json(
                    session
                        .client
                        .get(session.data_url(&format!("/sobjects/{}/describe", name))),
                )
                .await?;

            let sample = if limits.sample_rows > 0 {
                let fields: Vec<&str> = describe
                    .fields
                    .iter()
                    .filter(|f| !matches!(f.field_type.as_str(), "base64" | "address" | "location"))
                    .take(SAMPLE_FIELD_LIMIT)
                    .map(|f| f.name.as_str())
                    .collect();
                if fields.is_empty() {
                    None
                } else {
                    let soql = format!(
                        "SELECT {} FROM {} LIMIT {}",
                        fields.join(", "),
                        name,
                        limits.sample_rows
                    );
                    session.query(&soql).await.ok()
                }
            } else {
                None
            };

            tables.push(TableSchema {
                columns: describe
                    .fields
                    .into_iter()
                    .map(|f| ColumnInfo::new(f.name, f.field_type))
                    .collect(),
                name,
                sample,
            });
        }
        Ok(tables)
    }

    async fn execute(&mut self, sql: &str) -> AppResult<QueryResult> {
        self.session()?.query(sql).await
    }

    async fn close(&mut self) -> AppResult<()> {
        match self.session.take() {
            Some(session) => session.revoke().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_login_envelope_escapes_credentials() {
        let envelope = login_envelope("me@example.com", "p<w>&", "TOK");
        assert!(envelope.contains("<urn:username>me@example.com</urn:username>"));
        assert!(envelope.contains("<urn:password>p&lt;w&gt;&amp;TOK</urn:password>"));
    }

    #[test]
    fn test_parse_login_success() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">
<soapenv:Body><loginResponse><result>
<serverUrl>https://acme.my.salesforce.com/services/Soap/u/59.0/00D5g</serverUrl>
<sessionId>00D5g!AQ4AQ.session</sessionId>
</result></loginResponse></soapenv:Body></soapenv:Envelope>"#;
        assert_eq!(
            parse_login_response(body).unwrap(),
            LoginResult {
                session_id: "00D5g!AQ4AQ.session".into(),
                instance_url: Some("https://acme.my.salesforce.com".into()),
            }
        );
    }

    #[test]
    fn test_parse_login_fault() {
        let body = r#"<soapenv:Envelope><soapenv:Body><soapenv:Fault>
<faultcode>INVALID_LOGIN</faultcode>
<faultstring>INVALID_LOGIN: Invalid username, password, security token; or user locked out.</faultstring>
</soapenv:Fault></soapenv:Body></soapenv:Envelope>"#;
        let message = parse_login_response(body).unwrap_err();
        assert!(message.starts_with("INVALID_LOGIN: Invalid username"));
    }

    #[test]
    fn test_records_flatten_relationships() {
        let records = vec![
            json!({
                "attributes": { "type": "Contact", "url": "/services/data/v59.0/sobjects/Contact/1" },
                "Name": "Ann",
                "Account": { "attributes": { "type": "Account" }, "Name": "Acme" }
            }),
            json!({
                "attributes": { "type": "Contact" },
                "Name": "Bob",
                "Account": null
            }),
        ]
        .into_iter()
        .map(|v| match v {
            Value::Object(map) => map,
            _ => unreachable!(),
        })
        .collect();

        let result = records_to_result(records, 2);
        assert_eq!(result.columns.len(), 3);
        let cell = |row: usize, column: &str| {
            let idx = result.columns.iter().position(|c| c.name == column).unwrap();
            result.rows[row][idx].clone()
        };
        assert_eq!(cell(0, "Name"), json!("Ann"));
        assert_eq!(cell(0, "Account.Name"), json!("Acme"));
        assert_eq!(cell(1, "Name"), json!("Bob"));
        assert_eq!(cell(1, "Account.Name"), Value::Null);
        assert_eq!(cell(1, "Account"), Value::Null);
        assert!(result.columns.iter().all(|c| c.name != "attributes"));
    }

    #[test]
    fn test_count_query_uses_total_size() {
        let result = records_to_result(Vec::new(), 42);
        assert_eq!(result.to_text(), "count\n42");
        assert_eq!(records_to_result(Vec::new(), 0).to_text(), "(no rows)");
    }

    #[test]
    fn test_pick_objects_prefers_standard_then_custom() {
        let object = |name: &str, queryable: bool, custom: bool| SObjectSummary {
            name: name.into(),
            queryable,
            custom,
        };
        let picked = pick_objects(
            vec![
                object("AIApplication", true, false),
                object("Invoice__c", true, true),
                object("Contact", true, false),
                object("Account", true, false),
                object("Hidden", false, false),
            ],
            3,
        );
        assert_eq!(picked, vec!["Account", "Contact", "Invoice__c"]);
    }

    #[test]
    fn test_api_errors_joined() {
        let body = r#"[{"message":"unexpected token: FORM","errorCode":"MALFORMED_QUERY"}]"#;
        assert_eq!(api_errors(body), "MALFORMED_QUERY: unexpected token: FORM");
        assert_eq!(api_errors("Service Unavailable"), "Service Unavailable");
    }

    #[test]
    fn test_instance_url_normalization() {
        assert_eq!(
            instance_url("acme.my.salesforce.com/").unwrap(),
            "https://acme.my.salesforce.com"
        );
        assert!(instance_url(" ").is_err());
    }
}
