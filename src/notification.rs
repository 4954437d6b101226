//! Push/ping notifications and their authentication.

use axum::http::{HeaderMap, Method};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use std::io::{self, Read};
use subtle::ConstantTimeEq;

use crate::error::{PayloadError, Result};
use crate::github::RemoteRepository;

type HmacSha1 = Hmac<Sha1>;

pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";
pub const SIGNATURE_ALGORITHM: &str = "sha1";
const BRANCH_REF_PREFIX: &str = "refs/heads/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Push,
    Ping,
}

impl EventKind {
    fn parse(event: &str) -> Option<Self> {
        match event {
            "push" => Some(Self::Push),
            "ping" => Some(Self::Ping),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Owner {
    pub login: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub owner: Owner,
}

/// Wire shape of the webhook body. Missing fields decode as empty.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Payload {
    zen: String,
    after: String,
    deleted: bool,
    #[serde(rename = "ref")]
    git_ref: String,
    repository: Repository,
}

/// A validated push or ping event.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub event: EventKind,
    /// Only set for pings that carried a zen text.
    pub zen: Option<String>,
    /// Target commit (`after` in the payload).
    pub commit: String,
    pub deleted: bool,
    pub git_ref: String,
    pub repository: Repository,
}

/// Makes sure the request body is read to the end however validation exits.
struct DrainOnDrop<R: Read>(R);

impl<R: Read> Drop for DrainOnDrop<R> {
    fn drop(&mut self) {
        let _ = io::copy(&mut self.0, &mut io::sink());
    }
}

/// Reader that feeds every byte it hands out into the HMAC.
struct SignedBody<R: Read> {
    inner: R,
    mac: HmacSha1,
}

impl<R: Read> Read for SignedBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.mac.update(&buf[..n]);
        Ok(n)
    }
}

impl<R: Read> SignedBody<R> {
    /// Hashes whatever the decoder left unread and returns the hex digest.
    fn finish(mut self) -> io::Result<String> {
        io::copy(&mut self, &mut io::sink())?;
        Ok(hex::encode(self.mac.finalize().into_bytes()))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Splits `owner/name`; anything but exactly one separating slash is rejected.
fn split_full_name(full_name: &str) -> std::result::Result<(&str, &str), PayloadError> {
    match full_name.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => Err(PayloadError::InvalidRepositoryName(full_name.to_string())),
    }
}

impl Notification {
    /// Builds a push notification for the current head of `branch`.
    pub async fn from_remote(
        remote: &dyn RemoteRepository,
        full_name: &str,
        branch: &str,
    ) -> Result<Self> {
        let (owner, name) = split_full_name(full_name)?;
        let commit = remote.resolve_branch_head(full_name, branch).await?;

        Ok(Self {
            event: EventKind::Push,
            zen: None,
            commit,
            deleted: false,
            git_ref: format!("{}{}", BRANCH_REF_PREFIX, branch),
            repository: Repository {
                name: name.to_string(),
                full_name: full_name.to_string(),
                owner: Owner {
                    login: owner.to_string(),
                },
            },
        })
    }

    /// Authenticates and decodes an inbound webhook request.
    ///
    /// The body is read exactly once: it is decoded as JSON while the same
    /// bytes are fed to HMAC-SHA1 keyed by `secret`. The hex digest is then
    /// compared in constant time with the `X-Hub-Signature` value. The body
    /// is drained on every return path.
    pub fn from_request<R: Read>(
        secret: &str,
        method: &Method,
        headers: &HeaderMap,
        body: R,
    ) -> std::result::Result<Self, PayloadError> {
        let mut body = DrainOnDrop(body);

        if secret.is_empty() {
            return Err(PayloadError::MissingSecret);
        }

        if *method != Method::POST {
            return Err(PayloadError::InvalidMethod(method.to_string()));
        }

        let event = header_str(headers, EVENT_HEADER);
        if event.is_empty() {
            return Err(PayloadError::MissingEvent);
        }
        let event =
            EventKind::parse(event).ok_or_else(|| PayloadError::InvalidEvent(event.to_string()))?;

        let signature = header_str(headers, SIGNATURE_HEADER);
        if signature.is_empty() {
            return Err(PayloadError::MissingSignature);
        }
        let sign: Vec<&str> = signature.split('=').collect();
        if sign.len() != 2 {
            return Err(PayloadError::MalformedSignature);
        }
        if sign[0] != SIGNATURE_ALGORITHM {
            return Err(PayloadError::InvalidAlgorithm(sign[0].to_string()));
        }

        let mac = HmacSha1::new_from_slice(secret.as_bytes())
            .map_err(|_| PayloadError::MissingSecret)?;
        let mut signed = SignedBody {
            inner: &mut body.0,
            mac,
        };

        let payload: Payload = serde_json::from_reader(&mut signed)?;
        let actual = signed.finish()?;

        if !bool::from(actual.as_bytes().ct_eq(sign[1].as_bytes())) {
            return Err(PayloadError::SignatureMismatch);
        }

        if event == EventKind::Push {
            if payload.repository.full_name.is_empty() {
                return Err(PayloadError::MissingFullName);
            }
            if payload.repository.owner.login.is_empty() {
                return Err(PayloadError::MissingOwnerLogin);
            }
            if payload.after.is_empty() {
                return Err(PayloadError::MissingCommit);
            }
        }

        Ok(Self {
            event,
            zen: Some(payload.zen).filter(|z| !z.is_empty()),
            commit: payload.after,
            deleted: payload.deleted,
            git_ref: payload.git_ref,
            repository: payload.repository,
        })
    }

    /// A ping is recognised by its zen text. A `ping` event without one is
    /// handled like a push and fails the branch check.
    pub fn is_ping(&self) -> bool {
        self.zen.is_some()
    }

    /// The pushed branch, or an empty string when the ref is not a branch
    /// (e.g. `refs/tags/v1.0`).
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix(BRANCH_REF_PREFIX)
            .unwrap_or_default()
    }

    /// Identifies the publish pointer this notification may update:
    /// `owner/name--branch`.
    pub fn publish_key(&self) -> String {
        format!(
            "{}/{}--{}",
            self.repository.owner.login,
            self.repository.name,
            self.branch()
        )
    }
}

/// Computes the `X-Hub-Signature` header value for `body`.
pub fn sign_body(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!(
        "{}={}",
        SIGNATURE_ALGORITHM,
        hex::encode(mac.finalize().into_bytes())
    ))
}
