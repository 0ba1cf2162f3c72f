//! Authenticated client for the device's remote search API. Owns the
//! session lifecycle: token lease tracking, single-flight login, and the
//! periodic forced relogin that works around server-side session staleness.

pub mod protocol;


use crate::error::{SessionError, SourceError};
use crate::windows::SearchWindow;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use protocol::{
    BatteryState, BatteryValue, CommandRequest, CommandResponse, DeviceTime, LoginValue,
    SearchHit, SearchValue,
};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

const API_PATH: &str = "/cgi-bin/api.cgi";

/// Lease assumed when the device omits one.
const DEFAULT_LEASE_SECS: i64 = 3600;
/// Margin subtracted from the advertised lease so a token is never used
/// right at its expiry edge.
const LEASE_MARGIN_SECS: i64 = 60;
/// Response code the device uses for missing/expired tokens.
const AUTH_REQUIRED_CODE: i64 = -6;

/// Characters percent-encoded when a clip path is placed in a query string.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'?');

/// An authenticated token and its validity horizon.
#[derive(Debug, Clone)]
struct Session {
    token: String,
    lease_expiry: Instant,
}

impl Session {
    fn is_live(&self) -> bool {
        Instant::now() < self.lease_expiry
    }
}

/// Token-bearing playback and download URLs for one clip.
#[derive(Debug, Clone)]
pub struct PlaybackLocators {
    pub playback_url: String,
    pub download_url: String,
}

pub struct RemoteSearchSource {
    http: reqwest::Client,
    host: Url,
    username: String,
    password: String,
    channel: u32,
    /// Holding this lock across a login serializes concurrent callers:
    /// whoever arrives during an in-flight login waits on the lock and then
    /// reuses its outcome instead of issuing a second login.
    session: Mutex<Option<Session>>,
}

impl RemoteSearchSource {
    pub fn new(
        host: &str,
        username: &str,
        password: &str,
        channel: u32,
    ) -> Result<Self, config::ConfigError> {
        let host = Url::parse(host).map_err(|e| {
            config::ConfigError::Message(format!("invalid device host '{}': {}", host, e))
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| config::ConfigError::Message(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            host,
            username: username.to_string(),
            password: password.to_string(),
            channel,
            session: Mutex::new(None),
        })
    }

    fn api_url(&self, cmd: &str, token: Option<&str>) -> Url {
        let mut url = self.host.clone();
        url.set_path(API_PATH);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            pairs.append_pair("cmd", cmd);
            if let Some(token) = token {
                pairs.append_pair("token", token);
            }
        }
        url
    }

    async fn send(
        &self,
        cmd: &str,
        param: Value,
        token: Option<&str>,
    ) -> Result<Value, SourceError> {
        let body = vec![CommandRequest::new(cmd, param)];
        let response = self
            .http
            .post(self.api_url(cmd, token))
            .json(&body)
            .send()
            .await?;
        let mut responses: Vec<CommandResponse> = response.json().await?;
        if responses.is_empty() {
            return Err(SourceError::MalformedResponse {
                cmd: cmd.to_string(),
                detail: "empty response array".to_string(),
            });
        }
        let first = responses.remove(0);
        if let Some(fault) = first.error {
            return Err(SourceError::Protocol {
                cmd: cmd.to_string(),
                code: fault.rsp_code,
                detail: fault.detail,
            });
        }
        if first.code != 0 {
            return Err(SourceError::Protocol {
                cmd: cmd.to_string(),
                code: first.code,
                detail: "non-zero result code".to_string(),
            });
        }
        // set-style commands answer with code 0 and no value
        Ok(first.value.unwrap_or(Value::Null))
    }

    async fn login(&self) -> Result<Session, SessionError> {
        let param = json!({
            "User": {
                "userName": self.username,
                "password": self.password,
            }
        });
        let value = self.send("Login", param, None).await.map_err(|e| match e {
            SourceError::Transport(e) => SessionError::Transport(e),
            other => SessionError::LoginRejected {
                detail: other.to_string(),
            },
        })?;
        let login: LoginValue =
            serde_json::from_value(value).map_err(|_| SessionError::MissingToken)?;
        let lease = if login.token.lease_time > 0 {
            login.token.lease_time
        } else {
            DEFAULT_LEASE_SECS
        };
        let usable = (lease - LEASE_MARGIN_SECS).max(60) as u64;
        debug!("Logged in, token lease {}s", lease);
        Ok(Session {
            token: login.token.name,
            lease_expiry: Instant::now() + Duration::from_secs(usable),
        })
    }

    /// Returns a token valid for the next authenticated call, logging in
    /// first when the lease has lapsed.
    async fn ensure_token(&self) -> Result<String, SessionError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            if session.is_live() {
                return Ok(session.token.clone());
            }
        }
        *guard = None;
        let session = self.login().await?;
        let token = session.token.clone();
        *guard = Some(session);
        Ok(token)
    }

    async fn invalidate(&self) {
        *self.session.lock().await = None;
    }

    /// Sends an authenticated command, retrying once through a fresh login
    /// when the device reports the token as rejected or expired.
    async fn authed_send(&self, cmd: &str, param: Value) -> Result<Value, SourceError> {
        let token = self.ensure_token().await?;
        match self.send(cmd, param.clone(), Some(&token)).await {
            Err(SourceError::Protocol { code, .. }) if code == AUTH_REQUIRED_CODE => {
                debug!("Token rejected for {}, retrying after relogin", cmd);
                self.invalidate().await;
                let token = self.ensure_token().await?;
                self.send(cmd, param, Some(&token)).await
            }
            other => other,
        }
    }

    /// Forced logout + relogin cycle, run periodically by the owning device
    /// handler to sidestep server-side session staleness. Best-effort: a
    /// failed relogin leaves the source unauthenticated and the next call
    /// logs in organically.
    pub async fn force_relogin(&self) {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.take() {
            let body = vec![CommandRequest::new("Logout", json!({}))];
            let result = self
                .http
                .post(self.api_url("Logout", Some(&session.token)))
                .json(&body)
                .send()
                .await;
            if let Err(e) = result {
                debug!("Logout before relogin failed: {}", e);
            }
        }
        match self.login().await {
            Ok(session) => *guard = Some(session),
            Err(e) => warn!("Scheduled relogin failed: {}", e),
        }
    }

    /// One `Search` command, covering a single calendar-day window.
    pub async fn search(&self, window: &SearchWindow) -> Result<Vec<SearchHit>, SourceError> {
        let start = DeviceTime::from_epoch_ms(window.start_ms);
        let end = DeviceTime::from_epoch_ms(window.end_ms);
        let (start, end) = match (start, end) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(SourceError::UnrepresentableWindow {
                    start_ms: window.start_ms,
                    end_ms: window.end_ms,
                })
            }
        };
        let param = json!({
            "Search": {
                "channel": self.channel,
                "onlyStatus": 0,
                "streamType": "main",
                "StartTime": start,
                "EndTime": end,
            }
        });
        let value = self.authed_send("Search", param).await?;
        let parsed: SearchValue =
            serde_json::from_value(value).map_err(|e| SourceError::MalformedResponse {
                cmd: "Search".to_string(),
                detail: e.to_string(),
            })?;
        Ok(parsed.result.files)
    }

    /// Concatenates hits across windows. A window that fails is logged and
    /// contributes nothing; it never aborts the whole listing.
    pub async fn list(&self, windows: &[SearchWindow]) -> Vec<SearchHit> {
        let mut hits = Vec::new();
        for window in windows {
            match self.search(window).await {
                Ok(mut found) => hits.append(&mut found),
                Err(e) => warn!(
                    "Search window {}..{} failed: {}",
                    window.start_ms, window.end_ms, e
                ),
            }
        }
        hits
    }

    /// Builds token-bearing playback and download URLs for a clip path.
    /// Backslash separators are normalized, the leading slash dropped, and
    /// unsafe characters percent-encoded.
    pub async fn playback_locators(
        &self,
        clip_path: &str,
    ) -> Result<PlaybackLocators, SessionError> {
        let token = self.ensure_token().await?;
        let source = normalize_clip_path(clip_path);
        let encoded = utf8_percent_encode(&source, PATH_ENCODE_SET).to_string();
        let mut base = self.host.clone();
        base.set_path(API_PATH);
        base.set_query(None);
        let playback_url = format!(
            "{}?cmd=Playback&source={}&output={}&token={}",
            base, encoded, encoded, token
        );
        let download_url = format!("{}?cmd=Download&source={}&token={}", base, encoded, token);
        Ok(PlaybackLocators {
            playback_url,
            download_url,
        })
    }

    /// Current battery and sleep state (battery-powered devices only).
    pub async fn battery_state(&self) -> Result<BatteryState, SourceError> {
        let value = self
            .authed_send("GetBatteryInfo", json!({ "channel": self.channel }))
            .await?;
        let parsed: BatteryValue =
            serde_json::from_value(value).map_err(|e| SourceError::MalformedResponse {
                cmd: "GetBatteryInfo".to_string(),
                detail: e.to_string(),
            })?;
        Ok(parsed.battery)
    }

    /// Queries channel status, which wakes a sleeping battery device.
    pub async fn wake(&self) -> Result<(), SourceError> {
        self.authed_send("GetChannelstatus", json!({})).await?;
        Ok(())
    }

    /// Switches the device's white illumination LED.
    pub async fn set_white_led(&self, on: bool) -> Result<(), SourceError> {
        let param = json!({
            "WhiteLed": {
                "channel": self.channel,
                "state": if on { 1 } else { 0 },
            }
        });
        self.authed_send("SetWhiteLed", param).await?;
        Ok(())
    }

    /// Fetches a current still image over the same session machinery.
    pub async fn snapshot_jpeg(&self) -> Result<Bytes, SourceError> {
        let token = self.ensure_token().await?;
        let mut url = self.api_url("Snap", Some(&token));
        url.query_pairs_mut()
            .append_pair("channel", &self.channel.to_string())
            .append_pair("rs", &format!("{:x}", chrono::Utc::now().timestamp_millis()));
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Protocol {
                cmd: "Snap".to_string(),
                code: response.status().as_u16() as i64,
                detail: "snapshot request failed".to_string(),
            });
        }
        Ok(response.bytes().await?)
    }
}

fn normalize_clip_path(clip_path: &str) -> String {
    clip_path.replace('\\', "/").trim_start_matches('/').to_string()
}

#[cfg(test)]
mod path_tests {
    use super::normalize_clip_path;

    #[test]
    fn separators_and_leading_slash_are_normalized() {
        assert_eq!(
            normalize_clip_path("\\Mp4Record\\2023-06-15\\clip.mp4"),
            "Mp4Record/2023-06-15/clip.mp4"
        );
        assert_eq!(normalize_clip_path("/a/b.mp4"), "a/b.mp4");
        assert_eq!(normalize_clip_path("a/b.mp4"), "a/b.mp4");
    }
}
