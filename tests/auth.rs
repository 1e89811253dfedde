#![cfg(unix)]

use monkeyoxide::LogFilter;

mod common;

fn auth_filter(substring: &str) -> LogFilter {
    LogFilter {
        source: Some("auth".into()),
        substring: Some(substring.into()),
        ..Default::default()
    }
}

#[async_std::test]
async fn matching_credentials_are_submitted() {
    let mut browser = common::launch_stub();
    browser.add_auth(None, Some("R"), Some("alice"), Some("secret"));

    let win = browser.new_window(None).await.unwrap();
    browser.go(&win, "http://needsauth.test/", None).unwrap();
    browser.wait_loaded(&win, None).await.unwrap();

    // the stub echoes submitted credentials into the window log
    let log = browser.window(&win).unwrap().log();
    assert!(log.iter().any(|r| r.message == "username alice"));
    assert!(log.iter().any(|r| r.message == "password secret"));
    assert_eq!(browser.window(&win).unwrap().url(), "http://auth.test/ok");
    assert!(browser.login_windows().next().is_none());

    browser.quit_and_wait(None).await.unwrap();
}

#[async_std::test]
async fn best_scoring_candidate_wins() {
    let mut browser = common::launch_stub();
    // realm-only match scores 1; realm+username scores 2
    browser.add_auth(None, Some("R"), Some("bob"), Some("one"));
    browser.add_auth(None, Some("R"), Some("alice"), Some("two"));

    let win = browser.new_window(None).await.unwrap();
    browser.go(&win, "http://needsauth.test/", None).unwrap();
    browser.wait_loaded(&win, None).await.unwrap();

    let log = browser.window(&win).unwrap().log();
    assert!(log.iter().any(|r| r.message == "password two"));
    assert!(!log.iter().any(|r| r.message == "password one"));

    browser.quit_and_wait(None).await.unwrap();
}

#[async_std::test]
async fn unknown_prompt_is_cancelled() {
    let mut browser = common::launch_stub();

    let win = browser.new_window(None).await.unwrap();
    browser.go(&win, "http://needsauth.test/", None).unwrap();
    // the cancelled login still ends the load, with no content update
    browser.wait_loaded(&win, None).await.unwrap();

    let win = browser.window(&win).unwrap();
    assert!(!win.throbbing());
    assert_eq!(win.url(), "");
    assert!(win.log().iter().all(|r| r.source != "auth"));

    browser.quit_and_wait(None).await.unwrap();
}

#[async_std::test]
async fn removed_credentials_no_longer_apply() {
    let mut browser = common::launch_stub();
    browser.add_auth(None, Some("R"), Some("alice"), Some("secret"));
    browser.remove_auth(None, Some("R"), None, None);

    let win = browser.new_window(None).await.unwrap();
    browser.go(&win, "http://needsauth.test/", None).unwrap();
    browser.wait_loaded(&win, None).await.unwrap();

    assert_eq!(browser.window(&win).unwrap().url(), "");

    browser.quit_and_wait(None).await.unwrap();
}

#[async_std::test]
async fn certificate_exception_accepts_the_prompt() {
    let mut browser = common::launch_stub();
    browser.add_cert(Some("https://badcert.test/"));

    let win = browser.new_window(None).await.unwrap();
    browser.go(&win, "https://badcert.test/", None).unwrap();
    browser.wait_loaded(&win, None).await.unwrap();

    assert_eq!(browser.window(&win).unwrap().url(), "https://badcert.test/ok");
    assert!(browser.cert_windows().next().is_none());

    browser.quit_and_wait(None).await.unwrap();
}

#[async_std::test]
async fn certificate_prompt_without_exception_is_cancelled() {
    let mut browser = common::launch_stub();

    let win = browser.new_window(None).await.unwrap();
    browser.go(&win, "https://badcert.test/", None).unwrap();
    browser.wait_loaded(&win, None).await.unwrap();

    assert_eq!(browser.window(&win).unwrap().url(), "");

    browser.quit_and_wait(None).await.unwrap();
}
