use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;

use civic_sync::{TableQuery, TransportError};
use civic_types::api::RpcEnvelope;

/// Procedure and table calls over HTTP.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    api_url: String,
    api_key: Option<String>,
}

impl RestClient {
    pub fn new(api_url: &str, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// `POST /rpc/{procedure}` with the params as the JSON body.
    pub async fn rpc(&self, procedure: &str, params: &Value) -> Result<RpcEnvelope, TransportError> {
        let url = format!("{}/rpc/{}", self.api_url, procedure);
        debug!("POST {}", url);
        let resp = self.authorized(self.http.post(&url).json(params)).send().await;
        let resp = checked(resp).await?;
        resp.json::<RpcEnvelope>()
            .await
            .map_err(|e| TransportError::Decode(format!("{} envelope: {}", procedure, e)))
    }

    /// `GET /rest/{table}` with a column equality filter, ascending order.
    pub async fn select(&self, query: &TableQuery) -> Result<Vec<Value>, TransportError> {
        let url = format!("{}/rest/{}", self.api_url, query.table);
        debug!("GET {} where {}={}", url, query.filter_column, query.filter_value);
        let resp = self
            .authorized(self.http.get(&url).query(&select_params(query)))
            .send()
            .await;
        let body: Value = checked(resp)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::Decode(format!("{} rows: {}", query.table, e)))?;

        match body {
            Value::Array(rows) => Ok(rows),
            other => Err(TransportError::Decode(format!(
                "{} returned {} instead of a row list",
                query.table,
                kind(&other)
            ))),
        }
    }

    /// `POST /rest/{table}` with one row.
    pub async fn insert(&self, table: &str, row: &Value) -> Result<(), TransportError> {
        let url = format!("{}/rest/{}", self.api_url, table);
        debug!("POST {}", url);
        let resp = self.authorized(self.http.post(&url).json(row)).send().await;
        checked(resp).await?;
        Ok(())
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

/// Query string for a filtered, ordered table read.
pub fn select_params(query: &TableQuery) -> Vec<(String, String)> {
    vec![
        ("select".to_string(), query.select.clone()),
        (query.filter_column.clone(), format!("eq.{}", query.filter_value)),
        ("order".to_string(), format!("{}.asc", query.order_column)),
    ]
}

async fn checked(resp: Result<Response, reqwest::Error>) -> Result<Response, TransportError> {
    let resp = resp.map_err(|e| TransportError::Network(e.to_string()))?;
    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(TransportError::Status { status, body });
    }
    Ok(resp)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_params_filter_and_order() {
        let query = TableQuery {
            table: "official_notes".into(),
            select: "*,author:profiles!author_id(full_name)".into(),
            filter_column: "complaint_id".into(),
            filter_value: "C-9".into(),
            order_column: "created_at".into(),
        };
        let params = select_params(&query);
        assert_eq!(params[0], ("select".into(), "*,author:profiles!author_id(full_name)".into()));
        assert_eq!(params[1], ("complaint_id".into(), "eq.C-9".into()));
        assert_eq!(params[2], ("order".into(), "created_at.asc".into()));
    }
}
