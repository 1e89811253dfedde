#![cfg(unix)]

use monkeyoxide::driver::{Driver, Plan};

mod common;

fn stub_driver() -> Driver {
    // the wrapper trick: argv is wrapper + monkey path, so the shell runs
    // the stub script and the monkey path lands in $0
    Driver::new(
        "stub",
        vec!["/bin/sh".to_string(), "-c".to_string(), common::STUB.to_string()],
    )
}

fn plan(yaml: &str) -> Plan {
    serde_yaml::from_str(yaml).expect("plan should parse")
}

#[async_std::test]
async fn a_full_plan_runs_clean() {
    let plan = plan(
        r#"
group: stub
title: open, check, close
steps:
  - action: launch
    options:
      - --enable_javascript=0
  - action: window-new
    tag: w
    url: file:///t/index.html
  - action: block
    conditions:
      - window: w
        status: complete
  - action: plot-check
    window: w
    checks:
      - text-contains: Hello, world
      - text-not-contains: Goodbye
      - bitmap-count: 1
  - action: timer-start
    timer: slow
  - action: sleep-ms
    time: 120
  - action: timer-stop
    timer: slow
  - action: timer-start
    timer: fast
  - action: sleep-ms
    time: 10
  - action: timer-stop
    timer: fast
  - action: timer-check
    condition: fast < slow
  - action: clear-log
    window: w
  - action: js-exec
    window: w
    cmd: console.log('ping')
  - action: wait-log
    window: w
    source: js
    substring: ping
  - action: window-close
    window: w
  - action: quit
"#,
    );
    stub_driver().run(&plan).await.expect("plan should pass");
}

#[async_std::test]
async fn auth_steps_feed_the_login_policy() {
    let plan = plan(
        r#"
group: stub
title: credentials
steps:
  - action: launch
  - action: add-auth
    realm: R
    username: alice
    password: secret
  - action: window-new
    tag: w
  - action: navigate
    window: w
    url: http://needsauth.test/
  - action: wait-log
    window: w
    source: auth
    substring: username alice
  - action: block
    conditions:
      - window: "*all*"
        status: complete
  - action: quit
"#,
    );
    stub_driver().run(&plan).await.expect("plan should pass");
}

#[async_std::test]
async fn a_failed_check_fails_the_run() {
    let plan = plan(
        r#"
group: stub
title: failing check
steps:
  - action: launch
  - action: window-new
    tag: w
  - action: plot-check
    window: w
    checks:
      - text-contains: Goodbye, world
  - action: quit
"#,
    );
    let err = stub_driver().run(&plan).await.unwrap_err();
    assert!(err.to_string().contains("Goodbye, world"));
}

#[async_std::test]
async fn repeat_iterates_over_values() {
    let plan = plan(
        r#"
group: stub
title: repeated navigation
steps:
  - action: launch
  - action: window-new
    tag: w
  - action: repeat
    tag: urls
    values:
      - file:///t/one.html
      - file:///t/two.html
    steps:
      - action: navigate
        window: w
        repeaturl: urls
      - action: block
        conditions:
          - window: w
            status: complete
  - action: quit
"#,
    );
    stub_driver().run(&plan).await.expect("plan should pass");
}
