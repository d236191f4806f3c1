use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

use super::ProfileStore;
use crate::config::{connect_timeout, ProfileStoreConfig};
use crate::types::{ApplicantType, Education, UserDocumentRef, UserInfo, UserProfile};

/// Profile rows and document listings over PostgREST (`/rest/v1`), file
/// bytes through short-lived signed URLs from the storage API (`/storage/v1`).
pub struct RestProfileStore {
    rest_url: String,
    storage_url: String,
    bucket: String,
    signed_url_ttl_secs: u64,
    api_key: Option<String>,
    client: Client,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProfileRow {
    name: Option<String>,
    city: Option<String>,
    applicant_type: Option<ApplicantType>,
    education: Option<Education>,
    preferences: Option<BTreeMap<String, serde_json::Value>>,
}

impl From<ProfileRow> for UserProfile {
    fn from(row: ProfileRow) -> Self {
        UserProfile {
            user: UserInfo {
                name: row.name,
                city: row.city,
                applicant_type: row.applicant_type,
            },
            education: row.education.unwrap_or_default(),
            preferences: row.preferences.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    signed_url: String,
}

impl RestProfileStore {
    pub fn new(config: &ProfileStoreConfig, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout(Duration::from_secs(config.timeout_secs)))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            rest_url: format!("{}/rest/v1", base),
            storage_url: format!("{}/storage/v1", base),
            bucket: config.bucket.clone(),
            signed_url_ttl_secs: config.signed_url_ttl_secs,
            api_key,
            client,
        })
    }

    pub fn from_config(config: &ProfileStoreConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        Self::new(config, api_key)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("apikey", key).bearer_auth(key),
            None => builder,
        }
    }

    async fn get_rows<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let url = format!("{}/{}", self.rest_url, table);
        let response = self
            .authorize(self.client.get(&url).query(query))
            .send()
            .await
            .with_context(|| format!("Profile store request {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Profile store error ({}): {}", status, body));
        }
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} rows", table))
    }

    async fn sign(&self, storage_path: &str) -> Result<String> {
        let url = format!(
            "{}/object/sign/{}/{}",
            self.storage_url,
            self.bucket,
            storage_path.trim_start_matches('/')
        );
        let response = self
            .authorize(self.client.post(&url).json(&json!({ "expiresIn": self.signed_url_ttl_secs })))
            .send()
            .await
            .with_context(|| format!("Signing {} failed", storage_path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Storage sign error ({}): {}", status, body));
        }
        let signed: SignedUrl = response.json().await.context("Failed to parse signed URL")?;

        if signed.signed_url.starts_with("http://") || signed.signed_url.starts_with("https://") {
            Ok(signed.signed_url)
        } else {
            Ok(format!("{}/{}", self.storage_url, signed.signed_url.trim_start_matches('/')))
        }
    }
}

#[async_trait]
impl ProfileStore for RestProfileStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let rows: Vec<ProfileRow> = self
            .get_rows("profiles", &[("id", format!("eq.{}", user_id)), ("select", "*".to_string())])
            .await?;
        Ok(rows.into_iter().next().map(UserProfile::from))
    }

    async fn get_documents(&self, user_id: &str) -> Result<Vec<UserDocumentRef>> {
        self.get_rows(
            "documents",
            &[
                ("user_id", format!("eq.{}", user_id)),
                ("select", "storage_path,doc_type,mime_type".to_string()),
            ],
        )
        .await
    }

    async fn fetch_document(&self, document: &UserDocumentRef) -> Result<Bytes> {
        let signed_url = self.sign(&document.storage_path).await?;
        let response = self
            .client
            .get(&signed_url)
            .send()
            .await
            .with_context(|| format!("Downloading {} failed", document.storage_path))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Download of {} failed ({})", document.storage_path, status));
        }
        let bytes = response.bytes().await?;
        tracing::debug!(path = %document.storage_path, size = bytes.len(), "Downloaded user document");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> RestProfileStore {
        let config = ProfileStoreConfig {
            base_url: server.uri(),
            ..Default::default()
        };
        RestProfileStore::new(&config, Some("anon-key".into())).unwrap()
    }

    #[tokio::test]
    async fn test_get_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("id", "eq.user-1"))
            .and(header("apikey", "anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "user-1",
                "name": "Alex",
                "city": "Berlin",
                "applicant_type": "university",
                "education": {"type": "university", "degree": "B.Sc. Physics"},
                "preferences": null
            }])))
            .mount(&server)
            .await;

        let profile = store(&server).get_profile("user-1").await.unwrap().unwrap();
        assert_eq!(profile.user.name.as_deref(), Some("Alex"));
        assert_eq!(profile.applicant_type(), Some(ApplicantType::University));
        assert!(profile.education.fields.contains_key("degree"));
        assert!(profile.preferences.is_empty());
    }

    #[tokio::test]
    async fn test_missing_profile_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        assert!(store(&server).get_profile("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_documents_and_signed_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/documents"))
            .and(query_param("user_id", "eq.user-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"storage_path": "user-1/transcript.txt", "doc_type": "transcript", "mime_type": "text/plain"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/sign/user-documents/user-1/transcript.txt"))
            .and(body_json(json!({"expiresIn": 60})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "signedURL": "/object/sign/user-documents/user-1/transcript.txt?token=abc"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/object/sign/user-documents/user-1/transcript.txt"))
            .and(query_param("token", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("GPA 1.7"))
            .mount(&server)
            .await;

        let store = store(&server);
        let documents = store.get_documents("user-1").await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].filename(), "transcript.txt");

        let bytes = store.fetch_document(&documents[0]).await.unwrap();
        assert_eq!(&bytes[..], b"GPA 1.7");
    }

    #[tokio::test]
    async fn test_sign_failure_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Object not found"))
            .mount(&server)
            .await;
        let document = UserDocumentRef {
            storage_path: "user-1/missing.pdf".to_string(),
            doc_type: "cv".to_string(),
            mime_type: "application/pdf".to_string(),
        };
        let err = store(&server).fetch_document(&document).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
