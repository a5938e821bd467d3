// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Audio re-encoding through an external `ffmpeg` process.
//!
//! Browsers record voice notes as webm/opus, which the cloud API refuses.
//! Bytes are piped through ffmpeg into an ogg/opus container.

use std::path::PathBuf;
use std::process::Stdio;

use parley_core::ChannelError;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// MIME type produced by [`Transcoder::to_ogg_opus`].
pub const OGG_OPUS: &str = "audio/ogg; codecs=opus";

/// Runs ffmpeg when one is configured.
#[derive(Debug, Clone, Default)]
pub struct Transcoder {
    ffmpeg: Option<PathBuf>,
}

impl Transcoder {
    pub fn new(ffmpeg: Option<PathBuf>) -> Self {
        Self { ffmpeg }
    }

    /// Whether a binary is configured at all.
    pub fn is_available(&self) -> bool {
        self.ffmpeg.is_some()
    }

    /// Re-encode arbitrary audio bytes into ogg/opus.
    ///
    /// Fails permanently when no binary is configured or ffmpeg rejects the input.
    pub async fn to_ogg_opus(&self, input: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let ffmpeg = self.ffmpeg.as_ref().ok_or_else(|| {
            ChannelError::PermanentRejection(
                "audio format not accepted by provider and no ffmpeg_path configured".into(),
            )
        })?;

        let mut child = tokio::process::Command::new(ffmpeg)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-i",
                "pipe:0",
                "-vn",
                "-c:a",
                "libopus",
                "-b:a",
                "32k",
                "-f",
                "ogg",
                "pipe:1",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ChannelError::PermanentRejection(format!("failed to start ffmpeg: {e}"))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ChannelError::Transient("ffmpeg stdin unavailable".into()))?;
        let data = input.to_vec();
        // stdin is fed concurrently; a full stdout pipe would otherwise block the child.
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&data).await;
            drop(stdin);
            result
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ChannelError::Transient(format!("ffmpeg did not finish: {e}")))?;
        let fed = writer.await;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ChannelError::PermanentRejection(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        // A clean exit without consuming all input means truncated output.
        match fed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(input_bytes = input.len(), error = %e, "ffmpeg stopped reading input");
                return Err(ChannelError::PermanentRejection(format!(
                    "ffmpeg stopped reading input: {e}"
                )));
            }
            Err(e) => {
                warn!(error = %e, "ffmpeg input task failed");
                return Err(ChannelError::Transient(format!("ffmpeg input task failed: {e}")));
            }
        }

        debug!(
            input_bytes = input.len(),
            output_bytes = output.stdout.len(),
            "audio transcoded to ogg/opus"
        );
        Ok(output.stdout)
    }
}
