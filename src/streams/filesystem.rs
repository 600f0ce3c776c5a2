//! Virtual filesystem browsing and out-of-band file transfer.
//!
//! The remote side announces a filesystem object; directory listings are
//! fetched lazily through a request/response sub-protocol: `get` asks for
//! a path, `body` answers with a stream carrying a JSON manifest mapping
//! stream paths to mimetypes. A path is a directory exactly when its
//! mimetype equals the reserved directory sentinel.
//!
//! File bytes never travel in-band. Uploads and downloads are addressed
//! over HTTP by the session's connection identifier and the negotiating
//! stream's numeric index; the in-band stream exists only to negotiate
//! the transfer.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, ObjectIndex, StreamIndex};
use crate::protocol::opcode::{GET, PUT};
use crate::protocol::Instruction;

use super::codec::{ReadMode, StreamPayload, StreamTable};

// ============================================================================
// Constants
// ============================================================================

/// Reserved mimetype marking a stream path as a directory.
pub const DIRECTORY_MIMETYPE: &str = "application/vnd.glyptodon.guacamole.stream-index+json";

/// Mimetype sent for uploaded file bodies.
const UPLOAD_MIMETYPE: &str = "application/octet-stream";

// ============================================================================
// VirtualFileEntry
// ============================================================================

/// Node kind of a virtual filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Browsable directory.
    Directory,
    /// Downloadable file.
    File,
}

/// One filesystem node as learned from a directory manifest.
///
/// Replaced wholesale on each re-browse; the parent path is kept for
/// traversal only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFileEntry {
    /// Leaf name within the parent directory.
    pub name: String,
    /// Full stream path of this entry.
    pub path: String,
    /// Stream path of the containing directory.
    pub parent: String,
    /// Directory or file.
    pub kind: EntryKind,
}

impl VirtualFileEntry {
    /// Returns `true` for directory entries.
    #[inline]
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Sorts a listing directories-first, then lexicographically by name.
pub(crate) fn sort_entries(entries: &mut [VirtualFileEntry]) {
    entries.sort_by(|a, b| {
        (a.kind != EntryKind::Directory, &a.name).cmp(&(b.kind != EntryKind::Directory, &b.name))
    });
}

// ============================================================================
// DownloadOffer
// ============================================================================

/// An out-of-band download negotiated by the remote side.
///
/// The host fetches `url` with credentials; the in-band stream only
/// carried the offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOffer {
    /// Suggested filename.
    pub filename: String,
    /// Declared mimetype of the file body.
    pub mimetype: String,
    /// Fully addressed transfer URL.
    pub url: Url,
}

// ============================================================================
// Pending operations
// ============================================================================

/// Consumer of an expected `body` response, keyed by requested path.
enum PendingBody {
    /// A directory listing request.
    Browse {
        folder: String,
        reply: oneshot::Sender<Result<Vec<VirtualFileEntry>>>,
    },
    /// A file download request.
    Download {
        reply: oneshot::Sender<Result<DownloadOffer>>,
    },
}

impl PendingBody {
    fn cancel(self) {
        match self {
            Self::Browse { reply, .. } => {
                let _ = reply.send(Err(Error::Cancelled));
            }
            Self::Download { reply } => {
                let _ = reply.send(Err(Error::Cancelled));
            }
        }
    }
}

// ============================================================================
// FileSystemBrowser
// ============================================================================

/// Shared browse state: the one current folder view plus the set of
/// directory paths learned from manifests.
///
/// The view is replaced wholesale on every browse; the directory set only
/// grows, so a sibling folder learned earlier stays browsable after the
/// view moved on.
#[derive(Default)]
struct FsView {
    entries: Vec<VirtualFileEntry>,
    directories: rustc_hash::FxHashSet<String>,
}

/// Lazily populated virtual filesystem over object streams.
///
/// The current folder view is valid for exactly one folder at a time:
/// every browse replaces it entirely.
pub struct FileSystemBrowser {
    object: Option<ObjectIndex>,
    drive_name: String,
    connection_id: Option<ConnectionId>,
    transfer_base: Url,
    http: reqwest::Client,
    /// Browse state, shared with the completion tasks that replace it.
    view: Arc<Mutex<FsView>>,
    pending: FxHashMap<String, PendingBody>,
}

impl FileSystemBrowser {
    /// Creates a browser that addresses transfers under `transfer_base`.
    #[must_use]
    pub fn new(transfer_base: Url) -> Self {
        Self {
            object: None,
            drive_name: String::new(),
            connection_id: None,
            transfer_base,
            http: reqwest::Client::new(),
            view: Arc::new(Mutex::new(FsView::default())),
            pending: FxHashMap::default(),
        }
    }

    /// Records the connection identifier once assigned.
    pub fn set_connection_id(&mut self, id: ConnectionId) {
        self.connection_id = Some(id);
    }

    /// Returns `true` once the remote side has attached a filesystem.
    #[inline]
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.object.is_some()
    }

    /// Returns the display name of the attached drive.
    #[inline]
    #[must_use]
    pub fn drive_name(&self) -> &str {
        &self.drive_name
    }

    /// Returns a snapshot of the current folder view.
    #[must_use]
    pub fn current_view(&self) -> Vec<VirtualFileEntry> {
        self.view.lock().entries.clone()
    }

    /// Handles the `filesystem` attach instruction and eagerly opens the
    /// root listing.
    pub fn handle_attach(&mut self, instruction: &Instruction, table: &mut StreamTable) {
        let Some(object) = ObjectIndex::parse(instruction.arg(0)) else {
            warn!(arg = instruction.arg(0), "filesystem attach with unparsable index");
            return;
        };
        self.object = Some(object);
        self.drive_name = instruction.arg(1).to_string();
        debug!(%object, name = %self.drive_name, "filesystem attached");

        // eager root browse; the result lands in the shared view
        let (reply, root_rx) = oneshot::channel();
        self.request_listing("/", reply, table);
        tokio::spawn(async move {
            // browse result already replaced the view; errors only logged
            if let Ok(Err(e)) = root_rx.await
                && !e.is_cancelled()
            {
                warn!(error = %e, "root listing failed");
            }
        });
    }

    /// Handles the `undefine` instruction: the filesystem went away.
    pub fn handle_undefine(&mut self) {
        debug!("filesystem undefined by remote");
        self.object = None;
        {
            let mut view = self.view.lock();
            view.entries.clear();
            view.directories.clear();
        }
        for (_, pending) in self.pending.drain() {
            pending.cancel();
        }
    }

    /// Requests the listing of `folder`.
    ///
    /// Rejects immediately when `folder` is not a known directory. The
    /// resolved listing replaces the current view entirely.
    pub fn browse(
        &mut self,
        folder: &str,
        reply: oneshot::Sender<Result<Vec<VirtualFileEntry>>>,
        table: &mut StreamTable,
    ) {
        if self.object.is_none() {
            let _ = reply.send(Err(Error::invalid_manifest("no filesystem attached")));
            return;
        }
        if !self.is_known_directory(folder) {
            let _ = reply.send(Err(Error::not_a_directory(folder)));
            return;
        }
        self.request_listing(folder, reply, table);
    }

    /// Requests an out-of-band download of a file entry.
    pub fn download(
        &mut self,
        path: &str,
        reply: oneshot::Sender<Result<DownloadOffer>>,
        table: &mut StreamTable,
    ) {
        let Some(object) = self.object else {
            let _ = reply.send(Err(Error::invalid_manifest("no filesystem attached")));
            return;
        };
        if self.is_known_directory(path) {
            let _ = reply.send(Err(Error::upload(format!("{path} is a directory"))));
            return;
        }
        self.send_get(object, path, table);
        self.pending
            .insert(path.to_string(), PendingBody::Download { reply });
    }

    /// Uploads `data` into `folder` under a sanitized filename.
    ///
    /// The in-band `put` stream negotiates the transfer; after the
    /// initial acknowledgement the bytes travel over HTTP. An
    /// acknowledgement carrying an error status fails the upload before
    /// any bytes are sent.
    pub fn upload(
        &mut self,
        folder: &str,
        filename: &str,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
        table: &mut StreamTable,
    ) {
        let Some(object) = self.object else {
            let _ = reply.send(Err(Error::upload("no filesystem attached")));
            return;
        };
        let Some(connection_id) = self.connection_id.clone() else {
            let _ = reply.send(Err(Error::upload("no connection identifier")));
            return;
        };

        let name = sanitize_filename(filename);
        let target = join_stream_path(folder, &name);
        let mut writer = table.open_outbound();
        let put = Instruction::new(
            PUT,
            vec![
                object.to_string(),
                writer.index().to_string(),
                UPLOAD_MIMETYPE.to_string(),
                target,
            ],
        );
        if writer.open(put).is_err() {
            let _ = reply.send(Err(Error::ConnectionClosed));
            return;
        }

        let url = self.transfer_url(&connection_id, writer.index(), &name);
        let http = self.http.clone();
        tokio::spawn(async move {
            // flow-control gate: no bytes before the stream is accepted
            if let Err(e) = writer.await_ack().await {
                let _ = reply.send(Err(e));
                return;
            }
            let outcome = post_file(&http, url, name, data).await;
            if outcome.is_ok() {
                let _ = writer.finish();
            }
            let _ = reply.send(outcome);
        });
    }

    /// Handles a `body` response stream for a pending request.
    pub fn handle_body(&mut self, instruction: &Instruction, table: &mut StreamTable) {
        let Some(index) = StreamIndex::parse(instruction.arg(1)) else {
            warn!(arg = instruction.arg(1), "body with unparsable stream index");
            return;
        };
        let mimetype = instruction.arg(2).to_string();
        let path = instruction.arg(3).to_string();

        let Some(pending) = self.pending.remove(&path) else {
            trace!(%path, "body for no pending request ignored");
            return;
        };

        match pending {
            PendingBody::Browse { folder, reply } => {
                if mimetype != DIRECTORY_MIMETYPE {
                    let _ = reply.send(Err(Error::invalid_manifest(format!(
                        "expected directory manifest, got {mimetype}"
                    ))));
                    return;
                }
                let done_rx = table.open_inbound(index, mimetype, ReadMode::Json);
                let view = Arc::clone(&self.view);
                tokio::spawn(async move {
                    let outcome = match done_rx.await {
                        Ok(Ok(StreamPayload::Json(manifest))) => {
                            build_listing(&folder, &manifest)
                        }
                        Ok(Ok(_)) => Err(Error::invalid_manifest("manifest was not JSON")),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(Error::Cancelled),
                    };
                    if let Ok(ref entries) = outcome {
                        // a fresh browse always replaces the view; learned
                        // directories stay browsable
                        let mut view = view.lock();
                        view.entries = entries.clone();
                        view.directories.extend(
                            entries
                                .iter()
                                .filter(|e| e.is_directory())
                                .map(|e| e.path.clone()),
                        );
                    }
                    let _ = reply.send(outcome);
                });
            }
            PendingBody::Download { reply } => {
                let Some(connection_id) = self.connection_id.clone() else {
                    let _ = reply.send(Err(Error::upload("no connection identifier")));
                    return;
                };
                // consume and acknowledge any in-band blobs; the bytes
                // themselves travel out-of-band
                drop(table.open_inbound(index, mimetype.clone(), ReadMode::Binary));
                let filename = leaf_name(&path).to_string();
                let url = self.transfer_url(&connection_id, index, &filename);
                let _ = reply.send(Ok(DownloadOffer {
                    filename,
                    mimetype,
                    url,
                }));
            }
        }
    }

    /// Handles an inbound `file` offer pushed by the remote side.
    ///
    /// Returns the addressed offer for the host, if one can be built.
    pub fn handle_file_offer(
        &mut self,
        instruction: &Instruction,
        table: &mut StreamTable,
    ) -> Option<DownloadOffer> {
        let index = StreamIndex::parse(instruction.arg(0))?;
        let mimetype = instruction.arg(1).to_string();
        let filename = sanitize_filename(instruction.arg(2));
        let connection_id = self.connection_id.clone()?;

        // acknowledge any in-band blobs on the offer stream
        drop(table.open_inbound(index, mimetype.clone(), ReadMode::Binary));

        Some(DownloadOffer {
            url: self.transfer_url(&connection_id, index, &filename),
            filename,
            mimetype,
        })
    }

    /// Resolves every pending operation as cancelled.
    pub fn cancel_pending(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.cancel();
        }
    }

    fn request_listing(
        &mut self,
        folder: &str,
        reply: oneshot::Sender<Result<Vec<VirtualFileEntry>>>,
        table: &mut StreamTable,
    ) {
        let Some(object) = self.object else {
            let _ = reply.send(Err(Error::invalid_manifest("no filesystem attached")));
            return;
        };
        self.send_get(object, folder, table);
        self.pending.insert(
            folder.to_string(),
            PendingBody::Browse {
                folder: folder.to_string(),
                reply,
            },
        );
    }

    fn send_get(&self, object: ObjectIndex, path: &str, table: &StreamTable) {
        let get = Instruction::new(GET, vec![object.to_string(), path.to_string()]);
        if table.send_raw(get).is_err() {
            trace!(path, "get dropped, tunnel closed");
        }
    }

    /// The root and any directory-typed entry learned from a manifest may
    /// be browsed.
    fn is_known_directory(&self, path: &str) -> bool {
        path == "/" || self.view.lock().directories.contains(path)
    }

    /// Builds the out-of-band transfer URL for one stream.
    fn transfer_url(&self, connection_id: &ConnectionId, index: StreamIndex, filename: &str) -> Url {
        let mut url = self.transfer_base.clone();
        // the base is validated as http(s) at build time, so it always
        // has path segments
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            segments.push("tunnels");
            segments.push(connection_id.as_str());
            segments.push("streams");
            segments.push(&index.to_string());
            segments.push(filename);
        }
        url
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Replaces path separators and colons so a filename cannot collide with
/// the stream-path delimiter or inject nesting.
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect()
}

/// Joins a folder stream path and a leaf name.
fn join_stream_path(folder: &str, name: &str) -> String {
    if folder == "/" || folder.is_empty() {
        format!("/{name}")
    } else {
        format!("{}/{name}", folder.trim_end_matches('/'))
    }
}

/// Returns the leaf component of a stream path.
fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Builds a sorted listing from a manifest, filtered to direct children
/// of `folder`.
fn build_listing(
    folder: &str,
    manifest: &serde_json::Value,
) -> Result<Vec<VirtualFileEntry>> {
    let map = manifest
        .as_object()
        .ok_or_else(|| Error::invalid_manifest("manifest is not an object"))?;

    let prefix = if folder == "/" {
        "/".to_string()
    } else {
        format!("{}/", folder.trim_end_matches('/'))
    };

    let mut entries = Vec::with_capacity(map.len());
    for (path, mimetype) in map {
        // defensive: the server must only return children of the folder
        let Some(rest) = path.strip_prefix(&prefix) else {
            warn!(%path, folder, "manifest entry outside folder dropped");
            continue;
        };
        if rest.is_empty() || rest.contains('/') {
            warn!(%path, folder, "manifest entry not a direct child dropped");
            continue;
        }
        let mimetype = mimetype
            .as_str()
            .ok_or_else(|| Error::invalid_manifest("mimetype is not a string"))?;
        let kind = if mimetype == DIRECTORY_MIMETYPE {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        entries.push(VirtualFileEntry {
            name: rest.to_string(),
            path: path.clone(),
            parent: folder.to_string(),
            kind,
        });
    }
    sort_entries(&mut entries);
    Ok(entries)
}

/// Posts one file body as multipart form data, credentials included.
async fn post_file(
    http: &reqwest::Client,
    url: Url,
    filename: String,
    data: Vec<u8>,
) -> Result<()> {
    let part = reqwest::multipart::Part::bytes(data)
        .file_name(filename)
        .mime_str(UPLOAD_MIMETYPE)
        .map_err(|e| Error::upload(e.to_string()))?;
    let form = reqwest::multipart::Form::new().part("file", part);
    let response = http.post(url).multipart(form).send().await?;
    if !response.status().is_success() {
        return Err(Error::upload(format!(
            "transfer endpoint returned {}",
            response.status()
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::transport::tunnel::TunnelCommand;
    use crate::transport::TunnelHandle;

    fn setup() -> (FileSystemBrowser, StreamTable, UnboundedReceiver<TunnelCommand>) {
        let (tunnel, commands) = TunnelHandle::mock();
        let base = Url::parse("https://gateway.example/api").expect("base url");
        (
            FileSystemBrowser::new(base),
            StreamTable::new(tunnel),
            commands,
        )
    }

    fn sent(commands: &mut UnboundedReceiver<TunnelCommand>) -> Vec<Instruction> {
        let mut out = Vec::new();
        while let Ok(cmd) = commands.try_recv() {
            if let Some(ins) = cmd.into_instruction() {
                out.push(ins);
            }
        }
        out
    }

    fn attach(browser: &mut FileSystemBrowser, table: &mut StreamTable) {
        browser.set_connection_id(ConnectionId::new("conn-1"));
        browser.handle_attach(&Instruction::of("filesystem", &["0", "Shared Drive"]), table);
    }

    /// Feeds a manifest through the body/blob/end sequence for `folder`.
    fn deliver_manifest(
        table: &mut StreamTable,
        browser: &mut FileSystemBrowser,
        folder: &str,
        stream: &str,
        manifest: &serde_json::Value,
    ) {
        browser.handle_body(
            &Instruction::of("body", &["0", stream, DIRECTORY_MIMETYPE, folder]),
            table,
        );
        let chunk = BASE64.encode(manifest.to_string());
        table.handle_blob(&Instruction::of("blob", &[stream, &chunk]));
        table.handle_end(&Instruction::of("end", &[stream]));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a/b\\c:d.txt"), "a_b_c_d.txt");
        assert_eq!(sanitize_filename("plain.txt"), "plain.txt");
        assert_eq!(sanitize_filename("../x"), ".._x");
    }

    #[test]
    fn test_join_stream_path() {
        assert_eq!(join_stream_path("/", "a.txt"), "/a.txt");
        assert_eq!(join_stream_path("/root", "a.txt"), "/root/a.txt");
        assert_eq!(join_stream_path("/root/", "a.txt"), "/root/a.txt");
    }

    #[test]
    fn test_listing_sorted_directories_first() {
        let manifest = json!({
            "/b.txt": "text/plain",
            "/A": DIRECTORY_MIMETYPE,
            "/a.txt": "text/plain",
        });
        let entries = build_listing("/", &manifest).expect("listing");
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["A", "a.txt", "b.txt"]);
        assert!(entries[0].is_directory());
        assert!(!entries[1].is_directory());
    }

    #[test]
    fn test_listing_filters_foreign_and_nested_paths() {
        let manifest = json!({
            "/docs/readme.md": "text/plain",
            "/docs/sub/deep.md": "text/plain",
            "/elsewhere/file": "text/plain",
        });
        let entries = build_listing("/docs", &manifest).expect("listing");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "readme.md");
        assert_eq!(entries[0].path, "/docs/readme.md");
        assert_eq!(entries[0].parent, "/docs");
    }

    #[test]
    fn test_listing_rejects_non_object_manifest() {
        assert!(build_listing("/", &json!([1, 2, 3])).is_err());
        assert!(build_listing("/", &json!({"/x": 5})).is_err());
    }

    #[tokio::test]
    async fn test_attach_eagerly_requests_root() {
        let (mut browser, mut table, mut commands) = setup();
        attach(&mut browser, &mut table);

        let out = sent(&mut commands);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].opcode(), "get");
        assert_eq!(out[0].args(), &["0", "/"]);
        assert!(browser.is_attached());
    }

    #[tokio::test]
    async fn test_browse_replaces_view_wholesale() {
        let (mut browser, mut table, _commands) = setup();
        attach(&mut browser, &mut table);

        // root manifest: two directories
        deliver_manifest(
            &mut table,
            &mut browser,
            "/",
            "10",
            &json!({"/A": DIRECTORY_MIMETYPE, "/B": DIRECTORY_MIMETYPE}),
        );
        tokio::task::yield_now().await;
        assert_eq!(browser.current_view().len(), 2);

        // browse folder A
        let (reply, rx) = oneshot::channel();
        browser.browse("/A", reply, &mut table);
        deliver_manifest(
            &mut table,
            &mut browser,
            "/A",
            "11",
            &json!({"/A/one.txt": "text/plain", "/A/two.txt": "text/plain"}),
        );
        let listing = rx.await.expect("reply").expect("listing");
        assert_eq!(listing.len(), 2);

        // browse folder B: nothing from A survives
        let (reply, rx) = oneshot::channel();
        browser.browse("/B", reply, &mut table);
        deliver_manifest(
            &mut table,
            &mut browser,
            "/B",
            "12",
            &json!({"/B/three.txt": "text/plain"}),
        );
        let listing = rx.await.expect("reply").expect("listing");
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "three.txt");

        let view = browser.current_view();
        assert_eq!(view.len(), 1);
        assert!(view.iter().all(|e| e.parent == "/B"));
    }

    #[tokio::test]
    async fn test_browse_rejects_non_directory() {
        let (mut browser, mut table, _commands) = setup();
        attach(&mut browser, &mut table);
        deliver_manifest(
            &mut table,
            &mut browser,
            "/",
            "10",
            &json!({"/file.txt": "text/plain"}),
        );
        tokio::task::yield_now().await;

        let (reply, rx) = oneshot::channel();
        browser.browse("/file.txt", reply, &mut table);
        let err = rx.await.expect("reply").expect_err("rejected");
        assert!(matches!(err, Error::NotADirectory { .. }));
    }

    #[tokio::test]
    async fn test_body_mimetype_mismatch_rejects_browse_only() {
        let (mut browser, mut table, _commands) = setup();
        attach(&mut browser, &mut table);

        let (reply, rx) = oneshot::channel();
        browser.request_listing("/docs", reply, &mut table);
        browser.handle_body(
            &Instruction::of("body", &["0", "10", "text/plain", "/docs"]),
            &mut table,
        );

        let err = rx.await.expect("reply").expect_err("rejected");
        assert!(matches!(err, Error::InvalidManifest { .. }));
        // the session-level browser is still attached and usable
        assert!(browser.is_attached());
    }

    #[tokio::test]
    async fn test_cancel_pending_resolves_browse() {
        let (mut browser, mut table, _commands) = setup();
        attach(&mut browser, &mut table);

        let (reply, rx) = oneshot::channel();
        browser.request_listing("/docs", reply, &mut table);
        browser.cancel_pending();

        let err = rx.await.expect("resolved").expect_err("cancelled");
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_upload_sends_sanitized_put_and_gates_on_ack() {
        let (mut browser, mut table, mut commands) = setup();
        attach(&mut browser, &mut table);
        let _ = sent(&mut commands);

        let (reply, rx) = oneshot::channel();
        browser.upload(
            "/root",
            "a/b\\c:d.txt",
            vec![1, 2, 3],
            reply,
            &mut table,
        );

        let out = sent(&mut commands);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].opcode(), "put");
        assert_eq!(out[0].arg(0), "0");
        let stream_index = out[0].arg(1).to_string();
        assert_eq!(out[0].arg(3), "/root/a_b_c_d.txt");

        // error acknowledgement fails the upload before any bytes
        table.handle_ack(&Instruction::of("ack", &[&stream_index, "denied", "769"]));
        let err = rx.await.expect("reply").expect_err("failed");
        assert!(matches!(err, Error::StreamAborted { status: 769, .. }));
    }

    #[tokio::test]
    async fn test_download_offer_addressing() {
        let (mut browser, mut table, _commands) = setup();
        attach(&mut browser, &mut table);
        deliver_manifest(
            &mut table,
            &mut browser,
            "/",
            "10",
            &json!({"/report.pdf": "application/pdf"}),
        );
        tokio::task::yield_now().await;

        let (reply, rx) = oneshot::channel();
        browser.download("/report.pdf", reply, &mut table);
        browser.handle_body(
            &Instruction::of("body", &["0", "31", "application/pdf", "/report.pdf"]),
            &mut table,
        );

        let offer = rx.await.expect("reply").expect("offer");
        assert_eq!(offer.filename, "report.pdf");
        assert_eq!(offer.mimetype, "application/pdf");
        assert_eq!(
            offer.url.as_str(),
            "https://gateway.example/api/tunnels/conn-1/streams/31/report.pdf"
        );
    }

    #[tokio::test]
    async fn test_file_offer_pushed_by_remote() {
        let (mut browser, mut table, _commands) = setup();
        browser.set_connection_id(ConnectionId::new("conn-1"));

        let offer = browser
            .handle_file_offer(
                &Instruction::of("file", &["7", "text/plain", "notes:2026.txt"]),
                &mut table,
            )
            .expect("offer");
        assert_eq!(offer.filename, "notes_2026.txt");
        assert_eq!(
            offer.url.as_str(),
            "https://gateway.example/api/tunnels/conn-1/streams/7/notes_2026.txt"
        );
    }

    #[tokio::test]
    async fn test_undefine_clears_everything() {
        let (mut browser, mut table, _commands) = setup();
        attach(&mut browser, &mut table);
        deliver_manifest(
            &mut table,
            &mut browser,
            "/",
            "10",
            &json!({"/A": DIRECTORY_MIMETYPE}),
        );
        tokio::task::yield_now().await;
        assert!(!browser.current_view().is_empty());

        browser.handle_undefine();
        assert!(!browser.is_attached());
        assert!(browser.current_view().is_empty());
    }
}
