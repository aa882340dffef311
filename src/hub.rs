use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Error, Result};
use crate::tag::{digest_prefix, parse_last_updated, Tag};

/// One page of a paginated Docker Hub listing.
#[derive(Debug, Deserialize)]
struct Page<T> {
    next: Option<String>,
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ImageRecord {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TagRecord {
    name: String,
    last_updated: Option<String>,
    #[serde(default)]
    images: Vec<TagImageRecord>,
}

#[derive(Debug, Deserialize)]
struct TagImageRecord {
    digest: Option<String>,
}

impl TagRecord {
    fn into_tag(self, image_name: &str) -> Tag {
        let last_updated = self.last_updated.as_deref().and_then(|raw| {
            let parsed = parse_last_updated(raw);
            if parsed.is_none() {
                warn!("Unable to parse last_updated '{raw}' of tag {image_name}:{}", self.name);
            }
            parsed
        });
        let digest = self.images.first().and_then(|x| x.digest.as_deref());

        Tag {
            image_name: image_name.to_string(),
            last_updated,
            digest_prefix: digest_prefix(digest),
            name: self.name,
        }
    }
}

/// JWT handed out by the login endpoint. Only valid until [HubClient::logout].
#[derive(Debug)]
pub struct AuthToken(String);

impl AuthToken {
    fn header(&self) -> String {
        format!("JWT {}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Outcome of a deletion batch.
#[derive(Debug, Default)]
pub struct DeletionReport {
    pub deleted: Vec<Tag>,
    pub failed: Vec<(Tag, Error)>,
}

/// Client for the Docker Hub repository API of one namespace.
#[derive(Debug, Clone)]
pub struct HubClient {
    client: Client,
    base_url: String,
    namespace: String,
}

impl HubClient {
    pub fn new(base_url: &str, namespace: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// Fetch every page starting at `url`, following `next` until it is null.
    async fn collect_pages<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>> {
        let mut results = Vec::new();
        let mut next = Some(url);

        while let Some(url) = next {
            debug!("Fetching {url}");
            let page: Page<T> = self
                .client
                .get(&url)
                .send()
                .await
                .and_then(|x| x.error_for_status())
                .map_err(|e| Error::transport(format!("Failed to fetch {url}"), e))?
                .json()
                .await
                .map_err(|e| Error::transport(format!("Failed to decode {url}"), e))?;

            results.extend(page.results);
            next = page.next;
        }

        Ok(results)
    }

    #[instrument(skip(self))]
    pub async fn list_images(&self) -> Result<Vec<String>> {
        let url = format!("{}/v2/repositories/{}/", self.base_url, self.namespace);
        let images: Vec<ImageRecord> = self.collect_pages(url).await?;
        Ok(images.into_iter().map(|x| x.name).collect())
    }

    #[instrument(skip(self))]
    pub async fn list_tags(&self, image_name: &str) -> Result<Vec<Tag>> {
        let url = format!("{}/v2/repositories/{}/{image_name}/tags", self.base_url, self.namespace);
        let tags: Vec<TagRecord> = self.collect_pages(url).await?;
        Ok(tags.into_iter().map(|x| x.into_tag(image_name)).collect())
    }

    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthToken> {
        #[derive(Debug, Deserialize)]
        struct Response {
            token: String,
        }

        let response = self
            .client
            .post(format!("{}/v2/users/login/", self.base_url))
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::transport("Failed to reach the Docker Hub login endpoint", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth {
                status: status.as_u16(),
                body,
            });
        }

        let response: Response = response
            .json()
            .await
            .map_err(|e| Error::transport("Failed to decode the Docker Hub login response", e))?;
        Ok(AuthToken(response.token))
    }

    #[instrument(skip(self, token))]
    pub async fn delete_tag(&self, image_name: &str, tag_name: &str, token: &AuthToken) -> Result<()> {
        let url = format!(
            "{}/v2/repositories/{}/{image_name}/tags/{tag_name}/",
            self.base_url, self.namespace
        );
        let response = self
            .client
            .delete(url)
            .header(reqwest::header::AUTHORIZATION, token.header())
            .send()
            .await
            .map_err(|e| Error::transport(format!("Failed to delete tag {tag_name}"), e))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            Ok(())
        } else {
            Err(Error::Delete {
                tag: tag_name.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }

    /// Invalidate `token`. Failures are logged and otherwise ignored.
    #[instrument(skip(self, token))]
    pub async fn logout(&self, token: AuthToken) {
        let result = self
            .client
            .post(format!("{}/v2/logout/", self.base_url))
            .header(reqwest::header::AUTHORIZATION, token.header())
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => debug!("Logged out of the Docker Hub API"),
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                warn!("Failed to logout from Docker Hub API. Response code {status}. Response text: {body}");
            }
            Err(e) => warn!("Failed to logout from Docker Hub API: {e}"),
        }
    }

    /// Log in, delete every tag in `tags` and log out again.
    ///
    /// A failed login is reported and yields an empty report. Individual
    /// deletions that fail are collected and the remaining tags still processed.
    pub async fn delete_tags(&self, tags: Vec<Tag>, credentials: &Credentials) -> DeletionReport {
        let mut report = DeletionReport::default();

        let token = match self.login(credentials).await {
            Ok(token) => token,
            Err(e) => {
                error!("{e}");
                return report;
            }
        };

        for tag in tags {
            match self.delete_tag(&tag.image_name, &tag.name, &token).await {
                Ok(()) => {
                    info!("Deleted tag {}:{}", tag.image_name, tag.name);
                    report.deleted.push(tag);
                }
                Err(e) => {
                    error!("{e}");
                    report.failed.push((tag, e));
                }
            }
        }

        self.logout(token).await;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use time::macros::datetime;

    fn credentials() -> Credentials {
        Credentials {
            username: "alice".into(),
            password: "hunter2".into(),
        }
    }

    fn tag(image: &str, name: &str) -> Tag {
        Tag {
            image_name: image.into(),
            name: name.into(),
            last_updated: None,
            digest_prefix: "Unknown".into(),
        }
    }

    #[tokio::test]
    async fn follows_image_pagination() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let _first = server
            .mock("GET", "/v2/repositories/pingidentity/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"count": 3, "next": "{url}/v2/repositories/pingidentity/page2", "results": [{{"name": "pingaccess"}}, {{"name": "pingdirectory"}}]}}"#
            ))
            .create_async()
            .await;
        let _second = server
            .mock("GET", "/v2/repositories/pingidentity/page2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"count": 3, "next": null, "results": [{"name": "pingfederate"}]}"#)
            .create_async()
            .await;

        let hub = HubClient::new(&url, "pingidentity");
        let images = hub.list_images().await.unwrap();
        assert_eq!(images, vec!["pingaccess", "pingdirectory", "pingfederate"]);
    }

    #[tokio::test]
    async fn parses_tag_records() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let _tags = server
            .mock("GET", "/v2/repositories/pingidentity/pingfederate/tags")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"next": null, "results": [
                    {"name": "edge", "last_updated": "2025-06-01T10:11:12.345678Z",
                     "images": [{"digest": "sha256:0123456789abcdef0123"}]},
                    {"name": "old", "last_updated": null, "images": []}
                ]}"#,
            )
            .create_async()
            .await;

        let hub = HubClient::new(&url, "pingidentity");
        let tags = hub.list_tags("pingfederate").await.unwrap();

        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].image_name, "pingfederate");
        assert_eq!(tags[0].last_updated, Some(datetime!(2025-06-01 10:11:12)));
        assert_eq!(tags[0].digest_prefix, "sha256:0123456789");
        assert_eq!(tags[1].last_updated, None);
        assert_eq!(tags[1].digest_prefix, "Unknown");
    }

    #[tokio::test]
    async fn failing_page_aborts_listing() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let _first = server
            .mock("GET", "/v2/repositories/pingidentity/pingfederate/tags")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"next": "{url}/v2/repositories/pingidentity/pingfederate/tags/page2", "results": [{{"name": "edge"}}]}}"#
            ))
            .create_async()
            .await;
        let _second = server
            .mock("GET", "/v2/repositories/pingidentity/pingfederate/tags/page2")
            .with_status(500)
            .create_async()
            .await;

        let hub = HubClient::new(&url, "pingidentity");
        let result = hub.list_tags("pingfederate").await;
        assert!(matches!(result, Err(Error::Transport { .. })));
    }

    #[tokio::test]
    async fn rejected_login_carries_body() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/v2/users/login/")
            .with_status(401)
            .with_body(r#"{"detail": "Incorrect authentication credentials"}"#)
            .create_async()
            .await;

        let hub = HubClient::new(&server.url(), "pingidentity");
        match hub.login(&credentials()).await {
            Err(Error::Auth { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("Incorrect authentication credentials"));
            }
            other => panic!("expected an auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deletes_tags_and_collects_failures() {
        let mut server = mockito::Server::new_async().await;

        let login = server
            .mock("POST", "/v2/users/login/")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("username".into(), "alice".into()),
                Matcher::UrlEncoded("password".into(), "hunter2".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token": "abc"}"#)
            .create_async()
            .await;
        let deleted = server
            .mock("DELETE", "/v2/repositories/pingidentity/pingfederate/tags/edge/")
            .match_header("authorization", "JWT abc")
            .with_status(204)
            .create_async()
            .await;
        let refused = server
            .mock("DELETE", "/v2/repositories/pingidentity/pingfederate/tags/latest/")
            .match_header("authorization", "JWT abc")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;
        let also_deleted = server
            .mock("DELETE", "/v2/repositories/pingidentity/pingaccess/tags/edge/")
            .with_status(204)
            .create_async()
            .await;
        let logout = server
            .mock("POST", "/v2/logout/")
            .match_header("authorization", "JWT abc")
            .with_status(200)
            .create_async()
            .await;

        let hub = HubClient::new(&server.url(), "pingidentity");
        let report = hub
            .delete_tags(
                vec![
                    tag("pingfederate", "edge"),
                    tag("pingfederate", "latest"),
                    tag("pingaccess", "edge"),
                ],
                &credentials(),
            )
            .await;

        login.assert_async().await;
        deleted.assert_async().await;
        refused.assert_async().await;
        also_deleted.assert_async().await;
        logout.assert_async().await;

        let names: Vec<_> = report.deleted.iter().map(|x| (x.image_name.as_str(), x.name.as_str())).collect();
        assert_eq!(names, vec![("pingfederate", "edge"), ("pingaccess", "edge")]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, Error::Delete { status: 403, .. }));
    }

    #[tokio::test]
    async fn failed_login_deletes_nothing() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/v2/users/login/")
            .with_status(401)
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let hub = HubClient::new(&server.url(), "pingidentity");
        let report = hub.delete_tags(vec![tag("pingfederate", "edge")], &credentials()).await;

        delete.assert_async().await;
        assert!(report.deleted.is_empty());
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn failed_logout_keeps_deletions() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/v2/users/login/")
            .with_status(200)
            .with_body(r#"{"token": "abc"}"#)
            .create_async()
            .await;
        let _delete = server
            .mock("DELETE", "/v2/repositories/pingidentity/pingfederate/tags/edge/")
            .with_status(204)
            .create_async()
            .await;
        let _logout = server
            .mock("POST", "/v2/logout/")
            .with_status(500)
            .create_async()
            .await;

        let hub = HubClient::new(&server.url(), "pingidentity");
        let report = hub.delete_tags(vec![tag("pingfederate", "edge")], &credentials()).await;
        assert_eq!(report.deleted.len(), 1);
    }
}
