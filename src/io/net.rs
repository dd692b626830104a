use crate::error::Result;
use reqwest::blocking::{Client, Response};
use std::{
    fs::{self, File},
    io::{BufWriter, Read, Write},
    path::Path,
    time::Duration,
};
use tracing::{debug, warn};

/// Progress is reported at most once per this many bytes, plus start and end.
const PROGRESS_STEP: u64 = 256 * 1024;

pub fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60 * 60))
        .build()?)
}

/// Stream `url` into `dest` through a `.part` file, reporting
/// `(downloaded, total)` bytes as it goes. `total` is 0 when unknown.
/// A failed transfer leaves neither `dest` nor the `.part` file behind.
pub fn download_with_progress(
    client: &Client,
    url: &str,
    dest: &Path,
    on_progress: &dyn Fn(u64, u64),
) -> Result<()> {
    let part = dest.with_extension("part");
    debug!(url, dest = %dest.display(), "downloading");

    let resp = client.get(url).send()?.error_for_status()?;
    let total = resp.content_length().unwrap_or(0);
    on_progress(0, total);

    let downloaded = match stream_to(resp, &part, total, on_progress) {
        Ok(n) => n,
        Err(e) => {
            if let Err(rm) = fs::remove_file(&part) {
                warn!(path = %part.display(), error = %rm, "could not remove partial download");
            }
            return Err(e);
        }
    };

    if dest.exists() {
        fs::remove_file(dest)?;
    }
    fs::rename(&part, dest)?;

    let size = total.max(downloaded);
    on_progress(size, size);
    debug!(bytes = downloaded, dest = %dest.display(), "download complete");
    Ok(())
}

fn stream_to(
    mut resp: Response,
    part: &Path,
    total: u64,
    on_progress: &dyn Fn(u64, u64),
) -> Result<u64> {
    let mut file = BufWriter::new(File::create(part)?);
    let mut downloaded: u64 = 0;
    let mut reported: u64 = 0;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = resp.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        downloaded += n as u64;
        if downloaded - reported >= PROGRESS_STEP {
            reported = downloaded;
            on_progress(downloaded, total);
        }
    }
    file.flush()?;
    Ok(downloaded)
}
