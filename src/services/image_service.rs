use std::env;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::FilterType;
use image::{Delay, DynamicImage, Frame, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use indexmap::IndexSet;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ImageSettings;
use crate::domain::{rule_for, SensorKey};
use crate::providers::imap::{MailStore, MessageRecord, SearchQuery};

/// Canonical artifact frame size, shared by the digest, the placeholder and
/// the letterboxed mail images.
const CANVAS_WIDTH: u32 = 724;
const CANVAS_HEIGHT: u32 = 320;

/// Marker the informed-delivery digest embeds when mail is expected but no
/// mailpiece was scanned.
const NO_MAIL_MARKER: &str = "image-no-mailpieces700.jpg";

/// Attachment names that are sender logos or announcements, not mailpieces.
const IGNORED_ATTACHMENTS: &[&str] = &["mailerProvidedImage", "ra_0", "Mail Attachment"];

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image decode: {0}")]
    Decode(String),
    #[error("image encode: {0}")]
    Encode(String),
    #[error("ffmpeg not found on PATH")]
    EncoderMissing,
}

/// Result of one digest build: how many mailpieces went in and the artifact
/// file the frames were written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestOutcome {
    pub count: u32,
    pub name: String,
}

/// Builds the day's image artifacts under the configured output directory.
///
/// Artifact names are content-addressed against the placeholder and rotate
/// to a fresh random name once per day, so a cached consumer notices the
/// change without ever re-reading an unchanged file.
pub struct ImagePipeline {
    settings: ImageSettings,
}

impl ImagePipeline {
    pub fn new(settings: ImageSettings) -> Self {
        Self { settings }
    }

    pub fn artifact_dir(&self, amazon: bool) -> PathBuf {
        if amazon {
            self.settings.output_dir.join("amazon")
        } else {
            self.settings.output_dir.clone()
        }
    }

    /// Picks the artifact file name for today.
    ///
    /// An existing artifact is reused while it is from today or still the
    /// placeholder; anything older gets replaced by a fresh random name so
    /// stale downstream caches cannot serve yesterday's image.
    pub fn artifact_name(&self, amazon: bool, today: NaiveDate) -> Result<String, ImageError> {
        let dir = self.artifact_dir(amazon);
        fs::create_dir_all(&dir)?;
        let ext = if amazon { "jpg" } else { "gif" };
        let placeholder_hash = sha1_hex(&self.placeholder_bytes(amazon)?);

        let mut existing: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| {
                Path::new(name).extension().and_then(|e| e.to_str()) == Some(ext)
            })
            .collect();
        existing.sort();

        let Some(name) = existing.into_iter().next() else {
            return Ok(format!("{}.{ext}", Uuid::new_v4()));
        };

        let path = dir.join(&name);
        let same_day = created_date(&path) == Some(today);
        let is_placeholder = fs::read(&path)
            .map(|bytes| sha1_hex(&bytes) == placeholder_hash)
            .unwrap_or(false);
        if same_day || is_placeholder {
            debug!(name, "reusing existing artifact name");
            Ok(name)
        } else {
            Ok(format!("{}.{ext}", Uuid::new_v4()))
        }
    }

    /// Resolves today's artifact name and guarantees the slot holds at
    /// least the placeholder, so consumers of the name never see a missing
    /// file even when extraction later fails.
    pub fn ensure_artifact(&self, amazon: bool, today: NaiveDate) -> Result<String, ImageError> {
        let name = self.artifact_name(amazon, today)?;
        let target = self.artifact_dir(amazon).join(&name);
        if !target.is_file() {
            fs::write(&target, self.placeholder_bytes(amazon)?)?;
        }
        Ok(name)
    }

    /// Returns the "no mail" image, either the configured custom file or a
    /// synthesized neutral frame at the canonical size.
    pub fn placeholder_bytes(&self, amazon: bool) -> Result<Vec<u8>, ImageError> {
        if let Some(path) = &self.settings.custom_placeholder {
            let bytes = fs::read(path)?;
            image::load_from_memory(&bytes).map_err(|e| ImageError::Decode(e.to_string()))?;
            return Ok(bytes);
        }
        if amazon {
            synthesized_jpeg()
        } else {
            synthesized_gif()
        }
    }

    /// Fetches today's informed-delivery digests and assembles the scanned
    /// mailpieces into an animated artifact.
    ///
    /// Attachments matching the ignore list are dropped, duplicate content
    /// is folded by hash, and a synthesized frame stands in when the digest
    /// announces mail without a scan. Zero kept images writes the
    /// placeholder instead of an animation.
    pub async fn generate_digest<S: MailStore>(
        &self,
        store: &mut S,
        today: NaiveDate,
    ) -> Result<DigestOutcome, ImageError> {
        let name = self.ensure_artifact(false, today)?;
        let dir = self.artifact_dir(false);
        let target = dir.join(&name);

        let clip = Path::new(&name).with_extension("mp4");
        let mut keep = vec![name.as_str()];
        if let Some(clip_name) = clip.to_str() {
            keep.push(clip_name);
        }
        if let Err(e) = self.cleanup(false, &keep) {
            warn!(error = %e, "artifact cleanup failed");
        }

        let Some(rule) = rule_for(SensorKey::UspsMail) else {
            return Ok(DigestOutcome { count: 0, name });
        };

        let mut frames: Vec<(String, Vec<u8>)> = Vec::new();
        let mut seen: IndexSet<String> = IndexSet::new();
        let mut no_mail_marker = false;

        for &subject in rule.subjects {
            let query = SearchQuery::build(rule.senders, today, Some(subject));
            let uids = match store.search(&query).await {
                Ok(uids) => uids,
                Err(e) => {
                    warn!(error = %e, "mail digest search failed");
                    continue;
                }
            };
            for uid in uids {
                let raw = match store.fetch(uid).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        debug!(uid, error = %e, "fetch failed, skipping message");
                        continue;
                    }
                };
                let Some(record) = MessageRecord::parse(&raw) else {
                    debug!(uid, "skipping unparseable digest message");
                    continue;
                };
                if record.contains(NO_MAIL_MARKER) {
                    no_mail_marker = true;
                }
                for attachment in record.attachments() {
                    // Strip any path components smuggled into the name.
                    let file_name = attachment
                        .filename
                        .and_then(|f| Path::new(f).file_name())
                        .and_then(|f| f.to_str())
                        .unwrap_or("attachment");
                    if IGNORED_ATTACHMENTS.iter().any(|t| file_name.contains(t)) {
                        continue;
                    }
                    if !seen.insert(sha1_hex(attachment.bytes)) {
                        continue;
                    }
                    frames.push((file_name.to_string(), attachment.bytes.to_vec()));
                }
            }
        }

        let mut written: Vec<PathBuf> = Vec::new();
        let mut count = 0u32;
        for (index, (file_name, bytes)) in frames.iter().enumerate() {
            let path = dir.join(format!("{index:02}_{file_name}"));
            if let Err(e) = fs::write(&path, bytes) {
                error!(path = %path.display(), error = %e, "failed to store mail image");
                remove_files(&written);
                return Ok(DigestOutcome { count, name });
            }
            written.push(path);
            count += 1;
        }
        if no_mail_marker {
            count += 1;
        }

        if count == 0 {
            info!("no mail images found, writing placeholder");
            let placeholder = self.placeholder_bytes(false)?;
            fs::write(&target, placeholder)?;
            return Ok(DigestOutcome { count: 0, name });
        }

        let ms = u32::try_from(self.settings.frame_duration_secs.saturating_mul(1000))
            .unwrap_or(u32::MAX);
        let delay = || Delay::from_numer_denom_ms(ms, 1);
        let mut rendered: Vec<Frame> = Vec::with_capacity(frames.len() + 1);
        for (file_name, bytes) in &frames {
            match image::load_from_memory(bytes) {
                Ok(img) => rendered.push(Frame::from_parts(letterbox(&img), 0, 0, delay())),
                Err(e) => warn!(file = %file_name, error = %e, "skipping undecodable mail image"),
            }
        }
        if no_mail_marker {
            rendered.push(Frame::from_parts(no_mailpieces_frame(), 0, 0, delay()));
        }

        if rendered.is_empty() {
            error!("no mail image could be decoded, keeping previous artifact");
            remove_files(&written);
            return Ok(DigestOutcome { count, name });
        }

        let result = encode_gif(&target, rendered);
        remove_files(&written);
        result?;
        info!(count, artifact = %target.display(), "mail digest generated");
        Ok(DigestOutcome { count, name })
    }

    /// Transcodes the animated digest to an mp4 next to it.
    ///
    /// The previous mp4 is removed first so a failed run cannot leave a
    /// stale clip behind.
    pub async fn transcode_video(&self, gif_name: &str) -> Result<(), ImageError> {
        let ffmpeg = find_ffmpeg().ok_or(ImageError::EncoderMissing)?;
        let gif_path = self.settings.output_dir.join(gif_name);
        let mp4_path = gif_path.with_extension("mp4");
        if mp4_path.is_file() {
            fs::remove_file(&mp4_path)?;
        }

        let output = Command::new(ffmpeg)
            .arg("-f")
            .arg("gif")
            .arg("-i")
            .arg(&gif_path)
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-filter:v")
            .arg("crop='floor(in_w/2)*2:floor(in_h/2)*2'")
            .arg(&mp4_path)
            .output()
            .await?;
        if !output.status.success() {
            return Err(ImageError::Encode(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        debug!(clip = %mp4_path.display(), "digest transcoded to mp4");
        Ok(())
    }

    /// Copies the named artifacts into the web-servable directory, when one
    /// is configured. Missing sources are skipped.
    pub fn mirror_to_public(&self, names: &[&str]) -> Result<(), ImageError> {
        let Some(public) = &self.settings.public_dir else {
            return Ok(());
        };
        fs::create_dir_all(public)?;
        for &name in names {
            let source = self.settings.output_dir.join(name);
            if !source.is_file() {
                continue;
            }
            if let Err(e) = fs::copy(&source, public.join(name)) {
                warn!(file = name, error = %e, "failed to mirror artifact");
            }
        }
        Ok(())
    }

    /// Deletes every artifact in the directory except the named keepers.
    pub fn cleanup(&self, amazon: bool, keep: &[&str]) -> Result<(), ImageError> {
        let dir = self.artifact_dir(amazon);
        for entry in fs::read_dir(&dir)? {
            let Ok(entry) = entry else { continue };
            let Ok(name) = entry.file_name().into_string() else { continue };
            let is_artifact = matches!(
                Path::new(&name).extension().and_then(|e| e.to_str()),
                Some("gif" | "jpg" | "mp4")
            );
            if !is_artifact || keep.contains(&name.as_str()) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => debug!(file = %name, "removed stale artifact"),
                Err(e) => warn!(file = %name, error = %e, "failed to remove stale artifact"),
            }
        }
        Ok(())
    }
}

fn encode_gif(target: &Path, frames: Vec<Frame>) -> Result<(), ImageError> {
    let file = fs::File::create(target)?;
    let mut encoder = GifEncoder::new(file);
    encoder
        .set_repeat(Repeat::Infinite)
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    encoder
        .encode_frames(frames)
        .map_err(|e| ImageError::Encode(e.to_string()))
}

/// Scales the image to fit the canvas and centers it on a white frame.
fn letterbox(image: &DynamicImage) -> RgbaImage {
    let (width, height) = (image.width().max(1), image.height().max(1));
    let scale = f64::min(
        f64::from(CANVAS_WIDTH) / f64::from(width),
        f64::from(CANVAS_HEIGHT) / f64::from(height),
    );
    let new_w = ((f64::from(width) * scale).round() as u32).clamp(1, CANVAS_WIDTH);
    let new_h = ((f64::from(height) * scale).round() as u32).clamp(1, CANVAS_HEIGHT);
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Lanczos3);

    let mut canvas = RgbaImage::from_pixel(CANVAS_WIDTH, CANVAS_HEIGHT, Rgba([255, 255, 255, 255]));
    let x = i64::from((CANVAS_WIDTH - new_w) / 2);
    let y = i64::from((CANVAS_HEIGHT - new_h) / 2);
    image::imageops::overlay(&mut canvas, &resized, x, y);
    canvas
}

fn no_mailpieces_frame() -> RgbaImage {
    RgbaImage::from_pixel(CANVAS_WIDTH, CANVAS_HEIGHT, Rgba([221, 221, 221, 255]))
}

fn synthesized_gif() -> Result<Vec<u8>, ImageError> {
    let frame = RgbaImage::from_pixel(CANVAS_WIDTH, CANVAS_HEIGHT, Rgba([235, 235, 235, 255]));
    let mut buffer = Vec::new();
    let mut encoder = GifEncoder::new(&mut buffer);
    encoder
        .encode_frames([Frame::new(frame)])
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    drop(encoder);
    Ok(buffer)
}

fn synthesized_jpeg() -> Result<Vec<u8>, ImageError> {
    let frame = RgbImage::from_pixel(CANVAS_WIDTH, CANVAS_HEIGHT, Rgb([235, 235, 235]));
    let mut buffer = Cursor::new(Vec::new());
    frame
        .write_to(&mut buffer, ImageFormat::Jpeg)
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}

fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn created_date(path: &Path) -> Option<NaiveDate> {
    let meta = fs::metadata(path).ok()?;
    let stamp = meta.created().or_else(|_| meta.modified()).ok()?;
    Some(chrono::DateTime::<chrono::Local>::from(stamp).date_naive())
}

fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove intermediate image");
        }
    }
}

fn find_ffmpeg() -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join("ffmpeg"))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use chrono::Local;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::providers::imap::testing::{FakeMessage, FakeStore};

    fn pipeline(dir: &TempDir) -> ImagePipeline {
        ImagePipeline::new(ImageSettings {
            output_dir: dir.path().to_path_buf(),
            custom_placeholder: None,
            frame_duration_secs: 1,
            generate_video: false,
            public_dir: None,
        })
    }

    fn png_bytes(shade: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(8, 8, Rgb([shade, shade, shade]));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn digest_sender() -> String {
        rule_for(SensorKey::UspsMail).unwrap().senders[0].to_string()
    }

    fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    #[test]
    fn empty_directory_gets_fresh_name() {
        let dir = TempDir::new().unwrap();
        let name = pipeline(&dir).artifact_name(false, today()).unwrap();
        assert!(name.ends_with(".gif"));
        assert!(name.len() > ".gif".len());
    }

    #[test]
    fn same_day_artifact_is_reused() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("current.gif"), b"not really a gif").unwrap();
        let name = pipeline(&dir).artifact_name(false, today()).unwrap();
        assert_eq!(name, "current.gif");
    }

    #[test]
    fn stale_artifact_rotates_to_new_name() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("old.gif"), b"not really a gif").unwrap();
        // A reference day far in the past makes the fresh file look stale.
        let long_ago = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        let name = pipeline(&dir).artifact_name(false, long_ago).unwrap();
        assert_ne!(name, "old.gif");
        assert!(name.ends_with(".gif"));
    }

    #[test]
    fn placeholder_artifact_is_kept_even_when_stale() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        let placeholder = pipeline.placeholder_bytes(false).unwrap();
        fs::write(dir.path().join("none.gif"), &placeholder).unwrap();
        let long_ago = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        assert_eq!(pipeline.artifact_name(false, long_ago).unwrap(), "none.gif");
    }

    #[test]
    fn amazon_artifacts_use_jpg_in_subdirectory() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        let name = pipeline.artifact_name(true, today()).unwrap();
        assert!(name.ends_with(".jpg"));
        assert!(dir.path().join("amazon").is_dir());
    }

    #[tokio::test]
    async fn digest_assembles_and_deduplicates_attachments() {
        let dir = TempDir::new().unwrap();
        let piece = png_bytes(10);
        let other = png_bytes(200);
        let mut store = FakeStore::new(vec![FakeMessage::with_attachments(
            1,
            &digest_sender(),
            "Your Daily Digest for today",
            "See your mail below.",
            &[
                ("piece1.png", piece.as_slice()),
                ("piece2.png", other.as_slice()),
                ("copy_of_piece1.png", piece.as_slice()),
            ],
        )]);
        let pipeline = pipeline(&dir);

        let outcome = pipeline.generate_digest(&mut store, today()).await.unwrap();

        assert_eq!(outcome.count, 2);
        assert!(dir.path().join(&outcome.name).is_file());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n != &outcome.name)
            .collect();
        assert_eq!(leftovers, Vec::<String>::new());
    }

    #[tokio::test]
    async fn ignored_attachment_names_are_dropped() {
        let dir = TempDir::new().unwrap();
        let logo = png_bytes(10);
        let mut store = FakeStore::new(vec![FakeMessage::with_attachments(
            1,
            &digest_sender(),
            "Your Daily Digest for today",
            "See your mail below.",
            &[("mailerProvidedImage_ad.png", logo.as_slice())],
        )]);
        let pipeline = pipeline(&dir);

        let outcome = pipeline.generate_digest(&mut store, today()).await.unwrap();

        assert_eq!(outcome.count, 0);
        let written = fs::read(dir.path().join(&outcome.name)).unwrap();
        assert_eq!(written, pipeline.placeholder_bytes(false).unwrap());
    }

    #[tokio::test]
    async fn no_mail_marker_contributes_sentinel_frame() {
        let dir = TempDir::new().unwrap();
        let mut store = FakeStore::new(vec![FakeMessage::plain(
            1,
            &digest_sender(),
            "Your Daily Digest for today",
            "No scans today: image-no-mailpieces700.jpg shown instead.",
        )]);
        let pipeline = pipeline(&dir);

        let outcome = pipeline.generate_digest(&mut store, today()).await.unwrap();

        assert_eq!(outcome.count, 1);
        assert!(dir.path().join(&outcome.name).is_file());
    }

    #[tokio::test]
    async fn empty_mailbox_writes_placeholder() {
        let dir = TempDir::new().unwrap();
        let mut store = FakeStore::new(Vec::new());
        let pipeline = pipeline(&dir);

        let outcome = pipeline.generate_digest(&mut store, today()).await.unwrap();

        assert_eq!(outcome.count, 0);
        let written = fs::read(dir.path().join(&outcome.name)).unwrap();
        assert_eq!(written, pipeline.placeholder_bytes(false).unwrap());
    }

    #[test]
    fn cleanup_keeps_only_named_artifacts() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keep.gif"), b"keep").unwrap();
        fs::write(dir.path().join("stale.gif"), b"stale").unwrap();
        fs::write(dir.path().join("stale.mp4"), b"stale").unwrap();
        fs::write(dir.path().join("notes.txt"), b"unrelated").unwrap();

        pipeline(&dir).cleanup(false, &["keep.gif"]).unwrap();

        assert!(dir.path().join("keep.gif").is_file());
        assert!(dir.path().join("notes.txt").is_file());
        assert!(!dir.path().join("stale.gif").exists());
        assert!(!dir.path().join("stale.mp4").exists());
    }

    #[test]
    fn mirror_copies_artifacts_to_public_dir() {
        let dir = TempDir::new().unwrap();
        let public = TempDir::new().unwrap();
        let pipeline = ImagePipeline::new(ImageSettings {
            output_dir: dir.path().to_path_buf(),
            custom_placeholder: None,
            frame_duration_secs: 1,
            generate_video: false,
            public_dir: Some(public.path().to_path_buf()),
        });
        fs::write(dir.path().join("digest.gif"), b"frames").unwrap();

        pipeline.mirror_to_public(&["digest.gif", "missing.mp4"]).unwrap();

        assert_eq!(fs::read(public.path().join("digest.gif")).unwrap(), b"frames");
        assert!(!public.path().join("missing.mp4").exists());
    }

    #[test]
    fn letterbox_centers_on_canvas() {
        let tall = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 400, Rgb([0, 0, 0])));
        let framed = letterbox(&tall);
        assert_eq!((framed.width(), framed.height()), (CANVAS_WIDTH, CANVAS_HEIGHT));
        // Corners stay white, center carries the image.
        assert_eq!(framed.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
        assert_eq!(
            framed.get_pixel(CANVAS_WIDTH / 2, CANVAS_HEIGHT / 2),
            &Rgba([0, 0, 0, 255])
        );
    }

    #[test]
    fn custom_placeholder_must_decode() {
        let dir = TempDir::new().unwrap();
        let custom = dir.path().join("custom.gif");
        fs::write(&custom, b"not an image").unwrap();
        let pipeline = ImagePipeline::new(ImageSettings {
            output_dir: dir.path().to_path_buf(),
            custom_placeholder: Some(custom),
            frame_duration_secs: 1,
            generate_video: false,
            public_dir: None,
        });
        assert!(matches!(
            pipeline.placeholder_bytes(false),
            Err(ImageError::Decode(_))
        ));
    }
}
