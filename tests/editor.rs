//! End-to-end editor behaviour against a hosts file in a temp directory.

use qiantu_doctor::commit::{CommitError, DiskAccess, FileAccess};
use qiantu_doctor::domains;
use qiantu_doctor::editor::{HostsEditor, UnbindTarget};
use qiantu_doctor::elevation::{ElevationError, Elevator, NoElevation};
use qiantu_doctor::hosts::Upsert;
use qiantu_doctor::lookup::{IpLookup, LookupError};
use qiantu_doctor::resolver::{Resolver, Source};
use qiantu_doctor::AppError;
use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Answers every domain with one fixed address.
struct Always(Ipv4Addr);

impl IpLookup for Always {
    fn source(&self) -> Source {
        Source::IpApi
    }

    fn lookup(&self, _domain: &str) -> Result<Ipv4Addr, LookupError> {
        Ok(self.0)
    }
}

/// Direct writes are refused as if the process were unprivileged.
struct ReadOnlyWrites;

impl FileAccess for ReadOnlyWrites {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, _path: &Path, _content: &[u8]) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    }

    fn copy(&self, src: &Path, dst: &Path) -> io::Result<()> {
        fs::copy(src, dst).map(|_| ())
    }
}

struct CancelledPrompt;

impl Elevator for CancelledPrompt {
    fn copy_file(&self, _src: &Path, _dst: &Path) -> Result<(), ElevationError> {
        Err(ElevationError::Cancelled)
    }
}

struct Fixture {
    dir: TempDir,
    hosts: PathBuf,
    mappings: PathBuf,
}

impl Fixture {
    fn new(hosts_content: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let hosts = dir.path().join("hosts");
        let mappings = dir.path().join("domain_mappings.json");
        fs::write(&hosts, hosts_content).unwrap();
        Self {
            dir,
            hosts,
            mappings,
        }
    }

    fn map(&self, json: &str) {
        fs::write(&self.mappings, json).unwrap();
    }

    fn editor_with(
        &self,
        lookups: Vec<Box<dyn IpLookup>>,
        files: Box<dyn FileAccess>,
        elevator: Box<dyn Elevator>,
    ) -> HostsEditor {
        HostsEditor::new(
            &self.hosts,
            domains::tracked_domains(&[]),
            Resolver::new(&self.mappings, lookups),
            files,
            elevator,
        )
    }

    /// Config-file resolution only; any unmapped domain fails to resolve.
    fn editor(&self) -> HostsEditor {
        self.editor_with(Vec::new(), Box::new(DiskAccess), Box::new(NoElevation))
    }

    fn content(&self) -> String {
        fs::read_to_string(&self.hosts).unwrap()
    }

    fn backups(&self) -> Vec<PathBuf> {
        fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains("hosts.backup."))
            .collect()
    }
}

const SAMPLE: &str = "\
# Static table lookup for hostnames.
127.0.0.1\tlocalhost
::1\tlocalhost
1.2.3.4  preview.qiantucdn.com
5.5.5.5 js.qiantucdn.com # pinned last week
300.1.2.3 icon.qiantucdn.com
8.8.8.8 example.com
9.9.9.9 cdn.preview.qiantucdn.com
";

#[test]
fn listing_only_returns_tracked_hosts_with_valid_addresses() {
    let fx = Fixture::new(SAMPLE);
    let tracked = domains::tracked_domains(&[]);

    let bindings = fx.editor().list_tracked_bindings().unwrap();

    let hosts: Vec<&str> = bindings.keys().map(String::as_str).collect();
    assert_eq!(
        hosts,
        ["cdn.preview.qiantucdn.com", "js.qiantucdn.com", "preview.qiantucdn.com"]
    );
    assert!(bindings.values().all(|e| domains::is_tracked(&e.hostname, &tracked)));
    assert_eq!(bindings["preview.qiantucdn.com"].line, 4);
    assert_eq!(bindings["js.qiantucdn.com"].ip, Ipv4Addr::new(5, 5, 5, 5));
}

#[test]
fn configured_address_replaces_stale_binding() {
    let fx = Fixture::new("1.2.3.4  preview.qiantucdn.com\n");
    fx.map(r#"{"preview.qiantucdn.com": "5.6.7.8"}"#);

    let outcome = fx
        .editor()
        .bind(&["preview.qiantucdn.com".into()], true, true)
        .unwrap();

    assert_eq!(fx.content(), "5.6.7.8\tpreview.qiantucdn.com\n");
    assert_eq!(outcome.bound[0].resolution.source, Source::ConfigFile);
    assert_eq!(outcome.bound[0].change, Upsert::Replaced { stale: 0 });
    assert!(outcome.backup.is_some());
}

#[test]
fn preview_never_touches_the_file() {
    let fx = Fixture::new(SAMPLE);
    fx.map(r#"{"dl.58pic.com": "5.6.7.8"}"#);
    let editor = fx.editor();
    let before = editor.list_tracked_bindings().unwrap();

    let outcome = editor.bind(&["dl.58pic.com".into()], true, false).unwrap();

    assert!(outcome.content.ends_with(b"5.6.7.8\tdl.58pic.com\n"));
    assert!(outcome.backup.is_none());
    assert_eq!(fx.content(), SAMPLE);
    assert_eq!(editor.list_tracked_bindings().unwrap(), before);
    assert!(fx.backups().is_empty());
}

#[test]
fn committed_bind_leaves_exactly_one_entry() {
    let stale_cases = [
        "127.0.0.1 localhost\n",
        "127.0.0.1 localhost\n1.1.1.1 dl.58pic.com\n",
        "1.1.1.1 dl.58pic.com\n127.0.0.1 localhost\n2.2.2.2 dl.58pic.com\n3.3.3.3 DL.58pic.com\n",
    ];

    for content in stale_cases {
        let fx = Fixture::new(content);
        let editor = fx.editor_with(
            vec![Box::new(Always(Ipv4Addr::new(7, 7, 7, 7)))],
            Box::new(DiskAccess),
            Box::new(NoElevation),
        );

        editor.bind(&["dl.58pic.com".into()], true, true).unwrap();

        let written = fx.content();
        let matching: Vec<&str> = written
            .lines()
            .filter(|l| l.to_lowercase().contains("dl.58pic.com"))
            .collect();
        assert_eq!(matching, ["7.7.7.7\tdl.58pic.com"], "input: {content:?}");
        assert_eq!(
            editor.list_tracked_bindings().unwrap()["dl.58pic.com"].ip,
            Ipv4Addr::new(7, 7, 7, 7)
        );
        assert!(written.contains("127.0.0.1 localhost"));
    }
}

#[test]
fn gbk_comments_are_committed_untouched() {
    // "# 中文" in GBK, as Chinese Windows editors save it.
    let original: &[u8] = b"# \xd6\xd0\xce\xc4\r\n127.0.0.1 localhost\r\n";
    let fx = Fixture::new("");
    fs::write(&fx.hosts, original).unwrap();
    fx.map(r#"{"dl.58pic.com": "5.6.7.8"}"#);

    fx.editor().bind(&["dl.58pic.com".into()], true, true).unwrap();

    let mut expected = original.to_vec();
    expected.extend_from_slice(b"5.6.7.8\tdl.58pic.com\r\n");
    assert_eq!(fs::read(&fx.hosts).unwrap(), expected);

    fx.editor()
        .unbind(&UnbindTarget::Domain("dl.58pic.com".into()), true)
        .unwrap();
    assert_eq!(fs::read(&fx.hosts).unwrap(), original);
}

#[test]
fn unresolved_domains_are_skipped_but_others_bind() {
    let fx = Fixture::new("127.0.0.1 localhost\n");
    fx.map(r#"{"y.58pic.com": "6.6.6.6"}"#);

    let outcome = fx
        .editor()
        .bind(&["dl.58pic.com".into(), "y.58pic.com".into()], true, true)
        .unwrap();

    assert_eq!(outcome.unresolved, ["dl.58pic.com"]);
    assert_eq!(fx.content(), "127.0.0.1 localhost\n6.6.6.6\ty.58pic.com\n");
}

#[test]
fn bind_fails_when_nothing_resolves() {
    let fx = Fixture::new(SAMPLE);

    let err = fx
        .editor()
        .bind(&["dl.58pic.com".into()], true, true)
        .unwrap_err();

    assert!(matches!(err, AppError::Unresolved(ref d) if d == &["dl.58pic.com"]));
    assert_eq!(fx.content(), SAMPLE);
    assert!(fx.backups().is_empty());
}

#[test]
fn unbind_removes_domain_and_subdomains() {
    let fx = Fixture::new(SAMPLE);

    let outcome = fx
        .editor()
        .unbind(&UnbindTarget::Domain("preview.qiantucdn.com".into()), true)
        .unwrap();

    assert_eq!(outcome.removed.len(), 2);
    let remaining = fx.editor().list_tracked_bindings().unwrap();
    assert!(remaining
        .keys()
        .all(|h| !domains::is_same_or_subdomain(h, "preview.qiantucdn.com")));
    assert!(fx.content().contains("5.5.5.5 js.qiantucdn.com # pinned last week\n"));
    assert_eq!(fx.backups().len(), 1);
}

#[test]
fn unbind_also_matches_parent_domains() {
    let fx = Fixture::new("1.1.1.1 58pic.com\n2.2.2.2 y.58pic.com\n");

    let outcome = fx
        .editor()
        .unbind(&UnbindTarget::Domain("dl.58pic.com".into()), true)
        .unwrap();

    assert_eq!(outcome.removed[0].hostname, "58pic.com");
    assert_eq!(fx.content(), "2.2.2.2 y.58pic.com\n");
}

#[test]
fn unbind_all_tracked_keeps_unrelated_lines() {
    let fx = Fixture::new(SAMPLE);

    fx.editor().unbind(&UnbindTarget::AllTracked, true).unwrap();

    assert!(fx.editor().list_tracked_bindings().unwrap().is_empty());
    let content = fx.content();
    assert!(content.contains("8.8.8.8 example.com"));
    // Malformed lines are not entries, so they are left alone.
    assert!(content.contains("300.1.2.3 icon.qiantucdn.com"));
}

#[test]
fn unbind_without_match_is_a_clean_failure() {
    let fx = Fixture::new("127.0.0.1 localhost\n");

    let err = fx
        .editor()
        .unbind(&UnbindTarget::Domain("dl.58pic.com".into()), true)
        .unwrap_err();

    assert!(matches!(err, AppError::NoMatch(ref d) if d == "dl.58pic.com"));
    assert!(fx.backups().is_empty());
}

#[test]
fn refused_write_and_cancelled_prompt_leave_file_identical() {
    let fx = Fixture::new(SAMPLE);
    fx.map(r#"{"preview.qiantucdn.com": "5.6.7.8"}"#);
    let before = fs::read(&fx.hosts).unwrap();
    let editor = fx.editor_with(Vec::new(), Box::new(ReadOnlyWrites), Box::new(CancelledPrompt));

    let err = editor
        .bind(&["preview.qiantucdn.com".into()], true, true)
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(matches!(
        err,
        AppError::Commit(CommitError::Restored { cancelled: true, .. })
    ));
    assert_eq!(fs::read(&fx.hosts).unwrap(), before);
    assert_eq!(fx.backups().len(), 1);
}

#[test]
fn missing_hosts_file_is_reported() {
    let fx = Fixture::new("");
    fs::remove_file(&fx.hosts).unwrap();

    assert!(matches!(
        fx.editor().list_tracked_bindings(),
        Err(AppError::Hosts(_))
    ));
}
