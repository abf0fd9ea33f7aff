use chrono::{NaiveDate, NaiveDateTime};
use dubsync_render::{
    template_dir_at, ChangeEntry, ChangeHeader, ChangeKind, ChangeLog, ChangeLogRenderer,
};
use tempfile::TempDir;

fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 5, day)
        .and_then(|d| d.and_hms_opt(h, m, 0))
        .expect("valid date")
}

fn full_log(now: NaiveDateTime) -> ChangeLog {
    let mut log = ChangeLog::new(ChangeHeader {
        user: "Dana Ruiz".into(),
        at: at(3, 17, 40),
        now,
    });
    log.push(ChangeEntry::value("Voice actor", "M. Ortega", "L. Paz"));
    log.push(ChangeEntry::value("Due", "", "2026-05-10"));
    log.push(ChangeEntry::value("Studio", "B", ""));
    log.push(ChangeEntry::file("Script", ChangeKind::Uploaded));
    log.push(ChangeEntry::file("Mix", ChangeKind::Changed));
    log.push(ChangeEntry::file("Stems", ChangeKind::Deleted));
    log.push(ChangeEntry::comment("Note", "check <lip sync> at 02:11"));
    log
}

#[test]
fn every_change_kind_renders_in_plain_text() {
    let renderer = ChangeLogRenderer::new().expect("renderer");
    let plain = renderer.render_plain(&full_log(at(4, 9, 0))).expect("render");

    let expected = [
        "Dana Ruiz (2026-05-03 17:40)",
        "* Voice actor: M. Ortega → L. Paz",
        "* Due: set to 2026-05-10",
        "* Studio: cleared (was B)",
        "* Script: file uploaded",
        "* Mix: file changed",
        "* Stems: file deleted",
        "* Note: \"check <lip sync> at 02:11\"",
    ];
    let lines: Vec<&str> = plain.lines().collect();
    assert_eq!(lines, expected, "got:\n{plain}");
}

#[test]
fn every_change_kind_renders_in_html() {
    let renderer = ChangeLogRenderer::new().expect("renderer");
    let html = renderer.render_html(&full_log(at(3, 18, 0))).expect("render");

    assert!(html.contains("<i>17:40</i>"), "same-day header must be time only: {html}");
    assert!(html.contains("<b>Voice actor</b>: <s>M. Ortega</s> → L. Paz"));
    assert!(html.contains("<b>Script</b>: file uploaded"));
    assert!(html.contains("<q>check &lt;lip sync&gt; at 02:11</q>"));
    assert_eq!(html.matches("<li>").count(), 7);
}

#[test]
fn header_only_log_renders() {
    let renderer = ChangeLogRenderer::new().expect("renderer");
    let log = ChangeLog::new(ChangeHeader {
        user: "sync".into(),
        at: at(4, 8, 0),
        now: at(4, 8, 1),
    });
    let rendered = renderer.render(&log).expect("render");
    assert_eq!(rendered.plain, "sync (08:00)\n");
    assert!(rendered.html.contains("<ul>\n</ul>"), "got: {}", rendered.html);
}

#[test]
fn workspace_template_dir_overrides_html() {
    let home = TempDir::new().expect("tempdir");
    let dir = template_dir_at(home.path());
    std::fs::create_dir_all(&dir).expect("mkdir");
    std::fs::write(
        dir.join("changelog.html.tera"),
        "{% for e in entries %}[{{ e.column }}]{% endfor %}",
    )
    .expect("write");

    let renderer = ChangeLogRenderer::with_overrides(Some(&dir)).expect("renderer");
    let html = renderer.render_html(&full_log(at(4, 9, 0))).expect("render");
    assert_eq!(html, "[Voice actor][Due][Studio][Script][Mix][Stems][Note]");
}

#[test]
fn broken_override_fails_at_construction() {
    let home = TempDir::new().expect("tempdir");
    let dir = template_dir_at(home.path());
    std::fs::create_dir_all(&dir).expect("mkdir");
    std::fs::write(dir.join("changelog.txt.tera"), "{% if %}").expect("write");

    assert!(ChangeLogRenderer::with_overrides(Some(&dir)).is_err());
}
