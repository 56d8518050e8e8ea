//! # File identification
//! Resolves a path to `(mime, format, version, puid, encoding, size)`.
//!
//! The primary implementation shells out to [Siegfried](https://www.itforarchivists.com/siegfried)
//! (`sf -json`) and parses its report; when the tool is absent, slow, or
//! disabled, identification degrades to magic-number sniffing and extension
//! lookup. Character encodings are detected for textual media types.
use std::{fs, io::Read, path::Path};

use chardetng::EncodingDetector;
use log::debug;
use serde::Deserialize;

use crate::runner;

/// Wall-clock limit for one `sf` invocation, in seconds.
const SF_TIMEOUT: u64 = 30;

/// How much of a textual file is fed to the encoding detector.
const ENCODING_SAMPLE_BYTES: usize = 64 * 1024;

/// The identification tuple for one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identification {
    pub mime: Option<String>,
    pub format: Option<String>,
    pub version: Option<String>,
    pub puid: Option<String>,
    pub encoding: Option<String>,
    pub size: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SfReport {
    #[serde(default)]
    files: Vec<SfFile>,
}

#[derive(Debug, Deserialize)]
struct SfFile {
    #[serde(default)]
    filesize: Option<i64>,
    #[serde(default)]
    matches: Vec<SfMatch>,
}

#[derive(Debug, Deserialize)]
struct SfMatch {
    #[serde(default)]
    id: String,
    #[serde(default)]
    format: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    mime: String,
}

fn none_if_empty(s: String) -> Option<String> {
    if s.is_empty() || s == "UNKNOWN" {
        None
    } else {
        Some(s)
    }
}

/// Well-known identifications where the registry id is more reliable than
/// the reported media type: csv detected from extension only is plain text,
/// and `fmt/979` files carry no mime at all.
pub fn promote_mime(puid: Option<&str>, mime: Option<String>) -> Option<String> {
    match puid {
        Some("x-fmt/18") => Some("text/plain".into()),
        Some("fmt/979") => Some("application/xml".into()),
        _ => mime,
    }
}

pub struct Identifier {
    use_siegfried: bool,
}

impl Identifier {
    pub fn new(use_siegfried: bool) -> Self {
        Self { use_siegfried }
    }

    /// Identify the file at `path`. Never fails: identification degrades
    /// down to `application/octet-stream` with a size from the filesystem.
    pub fn identify(&self, path: &Path) -> Identification {
        let mut ident = Identification::default();

        if self.use_siegfried {
            self.run_siegfried(path, &mut ident);
        }

        if ident.mime.is_none() {
            sniff(path, &mut ident);
        }

        if ident.size.is_none() {
            ident.size = fs::metadata(path).ok().map(|meta| meta.len() as i64);
        }

        ident.mime = promote_mime(ident.puid.as_deref(), ident.mime.take());

        if ident
            .mime
            .as_deref()
            .is_some_and(|mime| mime.starts_with("text/"))
        {
            ident.encoding = detect_encoding(path);
        }

        ident
    }

    fn run_siegfried(&self, path: &Path, ident: &mut Identification) {
        let cmd = format!("sf -json {}", shell_words::quote(&path.to_string_lossy()));
        let out = runner::run_shell(&cmd, None, SF_TIMEOUT);
        if out.exit_code != 0 {
            debug!("sf failed on '{}': {}", path.display(), out.stderr.trim());
            return;
        }
        let Ok(report) = serde_json::from_str::<SfReport>(&out.stdout) else {
            debug!("Unparseable sf report for '{}'", path.display());
            return;
        };
        let Some(file) = report.files.into_iter().next() else {
            return;
        };
        ident.size = file.filesize;
        let Some(m) = file.matches.into_iter().next() else {
            return;
        };

        // Siegfried only sets a mime on xml files with an xml declaration
        let mut mime = m.mime;
        if let Some(params) = mime.find(';') {
            mime.truncate(params);
        }
        if mime.is_empty()
            && path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("xml"))
        {
            mime = "application/xml".into();
        }

        ident.mime = none_if_empty(mime);
        ident.format = none_if_empty(m.format);
        ident.version = none_if_empty(m.version);
        ident.puid = none_if_empty(m.id);
    }
}

/// Magic-number sniffing with an extension-table fallback.
fn sniff(path: &Path, ident: &mut Identification) {
    if let Ok(Some(kind)) = infer::get_from_path(path) {
        ident.mime = Some(kind.mime_type().to_owned());
        return;
    }
    ident.mime = Some(
        mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_owned(),
    );
}

/// Detect the character encoding from a bounded prefix of the file.
fn detect_encoding(path: &Path) -> Option<String> {
    let mut file = fs::File::open(path).ok()?;
    let mut buf = vec![0u8; ENCODING_SAMPLE_BYTES];
    let mut filled = 0;
    loop {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return None,
        }
        if filled == buf.len() {
            break;
        }
    }
    let mut detector = EncodingDetector::new();
    detector.feed(&buf[..filled], true);
    Some(detector.guess(None, true).name().to_owned())
}
