use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use ncspan_grabber::formats::{ArchiveFiles, ArchiveMetadata};
use predicates::prelude::*;

const YOUTUBE_URL: &str = "https://www.youtube.com/watch?v=abc123";

/// Stand-in for yt-dlp, run as `sh <script> <args...>`.
///
/// `--dump-single-json` prints `$FAKE_INFO`. Otherwise the script downloads
/// into `<dest>.part` and renames it to the `mp4` named by the `-o` template
/// when it finishes or is interrupted, like yt-dlp closing a live download.
/// With `FAKE_ENDLESS` set it keeps reporting until it is stopped.
const FAKE_YTDLP: &str = r#"
if [ "$1" = "--dump-single-json" ]; then
  if [ -z "$FAKE_INFO" ]; then
    echo "ERROR: [youtube] abc123: Video unavailable" >&2
    exit 1
  fi
  printf '%s\n' "$FAKE_INFO"
  exit 0
fi
dest=$(printf '%s' "$2" | sed 's/%(ext)s/mp4/')
trap 'mv "$dest.part" "$dest"; exit 0' INT TERM
printf 'media' > "$dest.part"
echo '[ncspan-progress] downloading 5 5 NA NA'
if [ -n "$FAKE_ENDLESS" ]; then
  while :; do
    echo '[ncspan-progress] downloading 5 NA NA NA'
    sleep 0.2
  done
fi
mv "$dest.part" "$dest"
echo '[ncspan-progress] finished 5 5 NA NA'
"#;

fn write_fake_ytdlp(dir: &Path) -> PathBuf {
    let path = dir.join("fake-yt-dlp.sh");
    fs::write(&path, FAKE_YTDLP).expect("write fake yt-dlp");
    path
}

fn grab_cmd(script: &Path, output_dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ncspan-grabber");
    cmd.env("NCSPAN_GRABBER_YTDLP_BIN", "sh")
        .env("NCSPAN_GRABBER_YTDLP_ARGS", script)
        .env_remove("RUST_LOG")
        .env_remove("FAKE_INFO")
        .env_remove("FAKE_ENDLESS")
        .arg("--output-dir")
        .arg(output_dir);
    cmd
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names = fs::read_dir(dir)
        .expect("read output dir")
        .map(|entry| {
            entry
                .expect("dir entry")
                .file_name()
                .to_string_lossy()
                .to_string()
        })
        .collect::<Vec<_>>();
    names.sort();
    names
}

fn single_capture(names: &[String], ext: &str) -> String {
    let captures = names
        .iter()
        .filter(|name| name.ends_with(&format!(".{ext}")))
        .collect::<Vec<_>>();
    assert_eq!(captures.len(), 1, "{names:?}");
    captures[0].trim_end_matches(&format!(".{ext}")).to_owned()
}

fn assert_timestamped(identifier: &str, prefix: &str) {
    let rest = identifier
        .strip_prefix(&format!("{prefix}live_"))
        .unwrap_or_else(|| panic!("unexpected capture name: {identifier}"));
    let (start, end) = rest
        .split_once("_to_")
        .unwrap_or_else(|| panic!("unexpected capture name: {identifier}"));
    for stamp in [start, end] {
        assert!(
            chrono::NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M%S").is_ok(),
            "bad timestamp {stamp:?} in {identifier}"
        );
    }
    assert!(start <= end, "{identifier}");
}

#[test]
fn scheduled_stream_exits_without_capturing() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let script = write_fake_ytdlp(temp.path());
    let out = temp.path().join("captures");

    grab_cmd(&script, &out)
        .env(
            "FAKE_INFO",
            r#"{"extractor":"youtube","is_live":true,"was_live":false,"release_timestamp":1767225600}"#,
        )
        .arg(YOUTUBE_URL)
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "stream is scheduled to go live at 2026-01-01 00:00:00 UTC",
        ))
        .stderr(predicate::str::contains("no capture attempted"));

    assert!(file_names(&out).is_empty());
}

#[test]
fn ended_stream_exits_without_capturing() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let script = write_fake_ytdlp(temp.path());
    let out = temp.path().join("captures");

    grab_cmd(&script, &out)
        .env(
            "FAKE_INFO",
            r#"{"extractor":"youtube","is_live":true,"was_live":true}"#,
        )
        .arg(YOUTUBE_URL)
        .assert()
        .success()
        .stderr(predicate::str::contains("stream has already ended"));

    assert!(file_names(&out).is_empty());
}

#[test]
fn finished_capture_is_renamed_with_archive_metadata() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let script = write_fake_ytdlp(temp.path());
    let out = temp.path().join("captures");

    grab_cmd(&script, &out)
        .env(
            "FAKE_INFO",
            r#"{"extractor":"youtube","is_live":false,"was_live":false}"#,
        )
        .args([
            YOUTUBE_URL,
            "--prefix",
            "kxyz_",
            "--ia-title",
            "Morning Show",
            "--ia-creator",
            "KXYZ",
            "--ia-license",
            "https://creativecommons.org/licenses/by/4.0/",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("capture complete"));

    let names = file_names(&out);
    assert_eq!(names.len(), 3, "{names:?}");
    let identifier = single_capture(&names, "mp4");
    assert_timestamped(&identifier, "kxyz_");
    assert_eq!(
        fs::read(out.join(format!("{identifier}.mp4"))).expect("read capture"),
        b"media"
    );

    let files: ArchiveFiles = quick_xml::de::from_str(
        &fs::read_to_string(out.join(format!("{identifier}_files.xml"))).expect("files xml"),
    )
    .expect("parse files xml");
    assert_eq!(files.files.len(), 1);
    assert_eq!(files.files[0].name, format!("{identifier}.mp4"));

    let meta: ArchiveMetadata = quick_xml::de::from_str(
        &fs::read_to_string(out.join(format!("{identifier}_meta.xml"))).expect("meta xml"),
    )
    .expect("parse meta xml");
    assert_eq!(meta.identifier, identifier);
    assert_eq!(meta.title, "Morning Show");
    assert_eq!(meta.creator, "KXYZ");
    assert_eq!(meta.description, "");
    assert_eq!(
        meta.license_url,
        "https://creativecommons.org/licenses/by/4.0/"
    );
    assert_eq!(meta.mediatype, "movies");
}

#[test]
fn info_failure_still_captures_as_generic() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let script = write_fake_ytdlp(temp.path());
    let out = temp.path().join("captures");

    grab_cmd(&script, &out)
        .arg(YOUTUBE_URL)
        .assert()
        .success()
        .stderr(predicate::str::contains("Video unavailable"))
        .stderr(predicate::str::contains("capture complete"));

    let names = file_names(&out);
    let identifier = single_capture(&names, "mp4");
    assert_timestamped(&identifier, "");
}

#[test]
fn duration_limit_stops_an_endless_download() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let script = write_fake_ytdlp(temp.path());
    let out = temp.path().join("captures");

    let started = Instant::now();
    grab_cmd(&script, &out)
        .env("FAKE_ENDLESS", "1")
        .args(["https://radio.example/live", "--duration", "1"])
        .timeout(Duration::from_secs(30))
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "stopping download after duration limit",
        ))
        .stderr(predicate::str::contains("download interrupted"))
        .stderr(predicate::str::contains("capture complete"));
    assert!(started.elapsed() >= Duration::from_secs(1));

    let names = file_names(&out);
    assert_eq!(names.len(), 3, "{names:?}");
    assert!(!names.iter().any(|name| name.ends_with(".part")), "{names:?}");
    let identifier = single_capture(&names, "mp4");
    assert_timestamped(&identifier, "");
    assert_eq!(
        fs::read(out.join(format!("{identifier}.mp4"))).expect("read capture"),
        b"media"
    );
    assert!(out.join(format!("{identifier}_meta.xml")).is_file());
}

#[test]
fn explicit_output_is_kept_as_named() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let script = write_fake_ytdlp(temp.path());
    let out = temp.path().join("captures");

    grab_cmd(&script, &out)
        .args(["https://radio.example/live", "-o", "concert.mp4"])
        .assert()
        .success();

    assert_eq!(
        file_names(&out),
        vec!["concert.mp4", "concert_files.xml", "concert_meta.xml"]
    );
    let meta: ArchiveMetadata = quick_xml::de::from_str(
        &fs::read_to_string(out.join("concert_meta.xml")).expect("meta xml"),
    )
    .expect("parse meta xml");
    assert_eq!(meta.title, "concert");
}

#[test]
fn missing_downloader_leaves_no_metadata() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let out = temp.path().join("captures");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ncspan-grabber");
    cmd.env("NCSPAN_GRABBER_YTDLP_BIN", temp.path().join("no-such-yt-dlp"))
        .env_remove("NCSPAN_GRABBER_YTDLP_ARGS")
        .env_remove("RUST_LOG")
        .args(["https://radio.example/live", "--output-dir"])
        .arg(&out)
        .assert()
        .success()
        .stderr(predicate::str::contains("download interrupted"))
        .stderr(predicate::str::contains("no finished capture file found"));

    assert!(file_names(&out).is_empty());
}

#[test]
fn debug_flag_and_log_file() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let script = write_fake_ytdlp(temp.path());
    let out = temp.path().join("captures");
    let log_file = temp.path().join("grab.log");
    fs::write(&log_file, "earlier run\n").expect("seed log file");

    grab_cmd(&script, &out)
        .args(["https://radio.example/live", "--debug", "--log-file"])
        .arg(&log_file)
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));

    let log = fs::read_to_string(&log_file).expect("read log file");
    assert!(log.starts_with("earlier run\n"), "{log}");
    assert!(log.contains("capture complete"), "{log}");
    assert!(log.contains("parsed cli"), "{log}");
}

/// Never-ending body, like an Icecast mount.
struct EndlessAudio;

impl Read for EndlessAudio {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        thread::sleep(Duration::from_millis(20));
        let n = buf.len().min(8 * 1024);
        buf[..n].fill(0xFF);
        Ok(n)
    }
}

fn spawn_radio_server() -> String {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());

    thread::spawn(move || {
        let Ok(request) = server.recv() else {
            return;
        };
        let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"audio/mpeg"[..])
            .expect("content type header");
        let response =
            tiny_http::Response::new(tiny_http::StatusCode(200), vec![header], EndlessAudio, None, None);
        // Fails once the client hangs up.
        let _ = request.respond(response);
    });

    base_url
}

#[test]
fn http_fetcher_captures_a_direct_stream() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let out = temp.path().join("captures");
    let base_url = spawn_radio_server();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ncspan-grabber");
    cmd.env_remove("RUST_LOG")
        .arg(format!("{base_url}/live"))
        .args(["--fetcher", "http", "--duration", "1", "--prefix", "radio_"])
        .arg("--output-dir")
        .arg(&out)
        .timeout(Duration::from_secs(30))
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "stopping download after duration limit",
        ));

    let names = file_names(&out);
    assert_eq!(names.len(), 3, "{names:?}");
    let identifier = single_capture(&names, "mp3");
    assert_timestamped(&identifier, "radio_");
    let size = fs::metadata(out.join(format!("{identifier}.mp3")))
        .expect("stat capture")
        .len();
    assert!(size > 0);
}
