//! Attachment upload, download, and bundle routes
//!
//! - POST /api/uploads                          multipart field `files`
//! - GET  /api/files/:name?gapId=               RBAC + traversal guard
//! - GET  /api/gaps/:id/attachments/download    zip bundle with bounds
//!
//! Stored filenames are randomized with a timestamp prefix so concurrent
//! uploads cannot collide; the original name survives only in the
//! descriptor. Download paths always re-check the gap read predicate.

use std::io::Write;
use std::path::{Path as FsPath, PathBuf};

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use rand::Rng;
use serde::Deserialize;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::auth::middleware::CurrentUser;
use crate::auth::rbac;
use crate::error::{AppError, AppResult};
use crate::models::AttachmentDescriptor;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    pub gap_id: i64,
}

/// Filenames we mint and accept: timestamp prefix, hex tag, safe chars
fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// Minted stored name: `<unix-millis>-<hex><ext>`
fn mint_filename(original: &str) -> String {
    let timestamp = chrono::Utc::now().timestamp_millis();
    let tag: u64 = rand::thread_rng().gen();
    let extension = FsPath::new(original)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    format!("{timestamp}-{tag:016x}{extension}")
}

// ============================================================================
// Upload
// ============================================================================

/// POST /api/uploads
///
/// Saves each part of the `files` field, enforcing the per-request count
/// and per-file size caps. On any violation the already-written files of
/// this request are removed before the error returns.
async fn upload_files(
    State(state): State<AppState>,
    Extension(_current): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<Vec<AttachmentDescriptor>>)> {
    let settings = &state.config.uploads;
    tokio::fs::create_dir_all(&settings.dir)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("upload dir unavailable: {e}")))?;

    let mut saved: Vec<(PathBuf, AttachmentDescriptor)> = Vec::new();

    let cleanup = |saved: &[(PathBuf, AttachmentDescriptor)]| {
        for (path, _) in saved {
            let _ = std::fs::remove_file(path);
        }
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                cleanup(&saved);
                return Err(AppError::invalid(format!("malformed multipart body: {err}")));
            }
        };

        if field.name() != Some("files") {
            continue;
        }

        if saved.len() >= settings.max_files_per_request {
            cleanup(&saved);
            return Err(AppError::PayloadTooLarge(format!(
                "at most {} files per request",
                settings.max_files_per_request
            )));
        }

        let original_name = field
            .file_name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "attachment".to_string());
        let mimetype = field
            .content_type()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                cleanup(&saved);
                return Err(AppError::invalid(format!("failed to read upload: {err}")));
            }
        };

        if bytes.len() as u64 > settings.max_file_size {
            cleanup(&saved);
            return Err(AppError::PayloadTooLarge(format!(
                "{original_name} exceeds the {} byte per-file limit",
                settings.max_file_size
            )));
        }

        let filename = mint_filename(&original_name);
        let path = settings.dir.join(&filename);
        if let Err(err) = tokio::fs::write(&path, &bytes).await {
            cleanup(&saved);
            return Err(AppError::Internal(anyhow::anyhow!(
                "failed to store upload: {err}"
            )));
        }

        let descriptor = AttachmentDescriptor {
            original_name,
            filename: filename.clone(),
            size: bytes.len() as u64,
            mimetype,
            path: format!("/api/files/{filename}"),
        };
        saved.push((path, descriptor));
    }

    if saved.is_empty() {
        return Err(AppError::invalid("no files in request"));
    }

    tracing::info!(files = saved.len(), "uploads stored");
    let descriptors = saved.into_iter().map(|(_, d)| d).collect();
    Ok((StatusCode::CREATED, Json(descriptors)))
}

// ============================================================================
// Single download
// ============================================================================

/// GET /api/files/:name?gapId= — subject to the gap read predicate
async fn download_file(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(name): Path<String>,
    Query(query): Query<FileQuery>,
) -> AppResult<Response> {
    if !is_safe_filename(&name) {
        return Err(AppError::invalid("invalid file name"));
    }

    let gap = state.gaps().get(query.gap_id).await?;
    rbac::ensure_can_read_gap(current.user(), &gap, &state.pocs()).await?;

    let path = state.config.uploads.dir.join(&name);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| AppError::not_found(format!("file {name}")))?;

    let response = (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        bytes,
    )
        .into_response();
    Ok(response)
}

// ============================================================================
// Zip bundle
// ============================================================================

/// One file planned into the bundle
#[derive(Debug, Clone, PartialEq)]
pub struct BundleEntry {
    pub subfolder: String,
    pub original_name: String,
    pub filename: String,
}

/// Collect the bundle plan from gap, resolution, and comment
/// attachments, organized into subfolders. Pure; bounds are checked by
/// the caller against actual on-disk sizes.
pub fn plan_bundle(
    gap_attachments: &[AttachmentDescriptor],
    resolution_attachments: &[AttachmentDescriptor],
    comment_attachments: &[(i64, Vec<AttachmentDescriptor>)],
) -> Vec<BundleEntry> {
    let mut entries = Vec::new();

    for descriptor in gap_attachments {
        entries.push(BundleEntry {
            subfolder: "gap".to_string(),
            original_name: descriptor.original_name.clone(),
            filename: descriptor.filename.clone(),
        });
    }
    for descriptor in resolution_attachments {
        entries.push(BundleEntry {
            subfolder: "resolution".to_string(),
            original_name: descriptor.original_name.clone(),
            filename: descriptor.filename.clone(),
        });
    }
    for (ordinal, descriptors) in comment_attachments {
        for descriptor in descriptors {
            entries.push(BundleEntry {
                subfolder: format!("comment-{ordinal}"),
                original_name: descriptor.original_name.clone(),
                filename: descriptor.filename.clone(),
            });
        }
    }
    entries
}

/// GET /api/gaps/:id/attachments/download
///
/// Bounds are enforced before any bytes are written: over the file-count
/// or total-size cap the request fails 413 without a body.
async fn download_bundle(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let gap = state.gaps().get(id).await?;
    rbac::ensure_can_read_gap(current.user(), &gap, &state.pocs()).await?;

    let comments = state.comments().list_for_gap(id).await?;
    let comment_attachments: Vec<(i64, Vec<AttachmentDescriptor>)> = comments
        .iter()
        .enumerate()
        .map(|(index, comment)| {
            (
                (index + 1) as i64,
                AttachmentDescriptor::list_from_value(Some(&comment.attachments)),
            )
        })
        .collect();

    let entries = plan_bundle(
        &AttachmentDescriptor::list_from_value(Some(&gap.attachments)),
        &AttachmentDescriptor::list_from_value(gap.resolution_attachments.as_ref()),
        &comment_attachments,
    );

    let settings = &state.config.uploads;
    if entries.len() > settings.zip_max_files {
        return Err(AppError::PayloadTooLarge(format!(
            "bundle would contain {} files; the limit is {}",
            entries.len(),
            settings.zip_max_files
        )));
    }

    // Stat everything up front so an oversized bundle never starts.
    let mut total: u64 = 0;
    for entry in &entries {
        if !is_safe_filename(&entry.filename) {
            continue;
        }
        let path = settings.dir.join(&entry.filename);
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            total += meta.len();
        }
    }
    if total > settings.zip_max_total_bytes {
        return Err(AppError::PayloadTooLarge(format!(
            "bundle would be {total} bytes; the limit is {}",
            settings.zip_max_total_bytes
        )));
    }

    let dir = settings.dir.clone();
    let gap_label = gap.gap_id.clone();
    let archive = tokio::task::spawn_blocking(move || build_zip(&dir, &entries))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("bundle task failed: {e}")))??;

    let response = (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{gap_label}-attachments.zip\""),
            ),
        ],
        archive,
    )
        .into_response();
    Ok(response)
}

fn build_zip(dir: &FsPath, entries: &[BundleEntry]) -> AppResult<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut zip = ZipWriter::new(std::io::Cursor::new(&mut buffer));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for entry in entries {
            if !is_safe_filename(&entry.filename) {
                tracing::warn!(filename = %entry.filename, "skipping unsafe bundle entry");
                continue;
            }
            let path = dir.join(&entry.filename);
            let Ok(bytes) = std::fs::read(&path) else {
                tracing::warn!(filename = %entry.filename, "bundle entry missing on disk");
                continue;
            };

            // Archive names use the original name under the subfolder;
            // collisions fall back to the stored name.
            let archive_name = if is_safe_filename(&entry.original_name) {
                format!("{}/{}", entry.subfolder, entry.original_name)
            } else {
                format!("{}/{}", entry.subfolder, entry.filename)
            };

            zip.start_file(archive_name, options)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("zip write failed: {e}")))?;
            zip.write_all(&bytes)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("zip write failed: {e}")))?;
        }

        zip.finish()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("zip finalize failed: {e}")))?;
    }
    Ok(buffer)
}

pub fn router() -> Router<AppState> {
    // The multipart limit covers a full batch of max-size files.
    let upload_limit = 11 * 10 * 1024 * 1024;
    Router::new()
        .route(
            "/api/uploads",
            post(upload_files).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/files/:name", get(download_file))
        .route("/api/gaps/:id/attachments/download", get(download_bundle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> AttachmentDescriptor {
        AttachmentDescriptor {
            original_name: name.to_string(),
            filename: format!("1700000000000-abcdef.{name}"),
            size: 1,
            mimetype: "application/octet-stream".to_string(),
            path: String::new(),
        }
    }

    #[test]
    fn test_safe_filename_rejects_traversal() {
        assert!(!is_safe_filename("../../etc/passwd"));
        assert!(!is_safe_filename("a/../b"));
        assert!(!is_safe_filename("dir/file"));
        assert!(!is_safe_filename(""));
        assert!(is_safe_filename("1700000000000-a1b2c3.pdf"));
    }

    #[test]
    fn test_minted_names_are_safe_and_keep_extension() {
        let name = mint_filename("report final.PDF");
        assert!(is_safe_filename(&name));
        assert!(name.ends_with(".PDF"));

        let no_ext = mint_filename("README");
        assert!(is_safe_filename(&no_ext));
    }

    #[test]
    fn test_minted_names_do_not_collide() {
        let a = mint_filename("a.txt");
        let b = mint_filename("a.txt");
        assert_ne!(a, b);
    }

    #[test]
    fn test_plan_bundle_subfolders() {
        let plan = plan_bundle(
            &[descriptor("intake.docx")],
            &[descriptor("fix.pdf")],
            &[(1, vec![descriptor("log.txt")]), (2, vec![])],
        );

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].subfolder, "gap");
        assert_eq!(plan[1].subfolder, "resolution");
        assert_eq!(plan[2].subfolder, "comment-1");
    }

    #[test]
    fn test_plan_bundle_empty_sources() {
        assert!(plan_bundle(&[], &[], &[]).is_empty());
    }
}
