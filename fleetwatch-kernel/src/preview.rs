//! Console snapshots from the host's management controller.
//!
//! While a host is down-like it runs a capture loop; the latest picture is kept
//! on the host and served over HTTP. The IPMI web implementation drives the
//! controller's CGI endpoints and converts the BMP it returns to PNG with
//! ImageMagick.

use async_trait::async_trait;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::Client;
use std::process::Stdio;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;

use crate::config::PowerConf;

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cannot log in to {0}")]
    Login(String),
    #[error("snapshot request answered {0}")]
    Status(u16),
    #[error("image conversion failed: {0}")]
    Convert(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ConsolePreview {
    pub timestamp: OffsetDateTime,
    pub png: Vec<u8>,
}

#[async_trait]
pub trait ConsolePreviewService: Send + Sync {
    async fn capture(&self, power: &PowerConf) -> Result<ConsolePreview, PreviewError>;
}

const SETTLE_DELAY: Duration = Duration::from_secs(3);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub struct IpmiConsolePreview {
    client: Client,
}

impl IpmiConsolePreview {
    pub fn new() -> Result<Self, PreviewError> {
        // management controllers ship self-signed certificates
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    async fn login(&self, power: &PowerConf) -> Result<String, PreviewError> {
        let resp = self
            .client
            .post(format!("https://{}/cgi/login.cgi", power.address))
            .form(&[("name", power.username.as_str()), ("pwd", power.password.as_str())])
            .send()
            .await?;

        let sid = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(session_id);

        match sid {
            Some(sid) => Ok(format!(
                "SID={}; langSetFlag=0; language=English; mainpage=system; subpage=top",
                sid
            )),
            None => Err(PreviewError::Login(format!("{}@{}", power.username, power.address))),
        }
    }

    async fn post_form(&self, address: &str, path: &str, cookie: &str, form: &[(&str, &str)]) -> Result<(), PreviewError> {
        self.client
            .post(format!("https://{}{}", address, path))
            .header(COOKIE, cookie)
            .form(form)
            .send()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConsolePreviewService for IpmiConsolePreview {
    async fn capture(&self, power: &PowerConf) -> Result<ConsolePreview, PreviewError> {
        let cookie = self.login(power).await?;
        let stamp = stamp_now();
        self.post_form(&power.address, "/cgi/upgrade_process.cgi", &cookie, &[("fwtype", "255"), ("time_stamp", &stamp)])
            .await?;

        let timestamp = OffsetDateTime::now_utc();
        let stamp = stamp_now();
        self.post_form(
            &power.address,
            "/cgi/CapturePreview.cgi",
            &cookie,
            &[("IKVM_PREVIEW.XML", "(0,0)"), ("time_stamp", &stamp)],
        )
        .await?;
        tokio::time::sleep(SETTLE_DELAY).await;

        let stamp = stamp_now();
        let resp = self
            .client
            .get(format!("https://{}/cgi/url_redirect.cgi", power.address))
            .query(&[("url_name", "Snapshot"), ("url_type", "img"), ("time_stamp", stamp.as_str())])
            .header(COOKIE, &cookie)
            .send()
            .await?;
        if resp.status().as_u16() != 200 {
            return Err(PreviewError::Status(resp.status().as_u16()));
        }
        let bmp = resp.bytes().await?;
        let png = bmp_to_png(&bmp).await?;
        Ok(ConsolePreview { timestamp, png })
    }
}

fn stamp_now() -> String {
    OffsetDateTime::now_utc().unix_timestamp().to_string()
}

/// Value of the `SID` cookie in a `Set-Cookie` header, if that is what it sets.
fn session_id(set_cookie: &str) -> Option<String> {
    let first = set_cookie.split(';').next()?;
    let (name, value) = first.split_once('=')?;
    if name.trim() == "SID" && !value.trim().is_empty() {
        Some(value.trim().to_string())
    } else {
        None
    }
}

async fn bmp_to_png(bmp: &[u8]) -> Result<Vec<u8>, PreviewError> {
    pipe_through("convert", &["-", "png:-"], bmp).await
}

/// Feed `input` to `program` and collect its stdout. Stdin is written from its
/// own task while the pipes drain, so a chatty child cannot stall the write.
async fn pipe_through(program: &str, args: &[&str], input: &[u8]) -> Result<Vec<u8>, PreviewError> {
    let mut child = AsyncCommand::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| PreviewError::Convert(format!("{program}: stdin not captured")))?;
    let input = input.to_vec();
    let writer = tokio::spawn(async move {
        // the pipe closes when stdin drops at the end of this task
        stdin.write_all(&input).await
    });

    let output = child.wait_with_output().await?;
    let written = writer.await;
    if !output.status.success() {
        return Err(PreviewError::Convert(format!(
            "{program} exit {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    match written {
        Ok(result) => result?,
        Err(e) => return Err(PreviewError::Convert(format!("{program}: stdin writer failed: {e}"))),
    }
    Ok(output.stdout)
}
