//! A deterministic stand-in for the browser child: a small shell script
//! speaking the wire protocol on stdio. URLs select behaviours: anything
//! containing `needsauth` raises a login prompt, `badcert` a certificate
//! prompt, and `die-mid-load` starts a load and then exits.

use std::time::Duration;

use monkeyoxide::{Browser, BrowserConfig};

pub const STUB: &str = r#"
load() {
  case "$2" in
  *needsauth*)
    lwin=$1
    echo "WINDOW START_THROBBER $1"
    echo "LOGIN READY lw0 url $2 realm R username alice"
    ;;
  *badcert*)
    cwin=$1
    echo "WINDOW START_THROBBER $1"
    echo "SSLCERT READY cw0 url $2"
    ;;
  *die-mid-load*)
    echo "WINDOW START_THROBBER $1"
    exit 1
    ;;
  *neverloads*)
    echo "WINDOW START_THROBBER $1"
    ;;
  *)
    echo "WINDOW START_THROBBER $1"
    echo "WINDOW SET_URL $1 url $2"
    echo "WINDOW TITLE $1 str Stub page"
    echo "WINDOW STOP_THROBBER $1"
    ;;
  esac
}

win=0
lwin=
cwin=
while read -r line; do
  set -- $line
  case "$1" in
  WINDOW)
    case "$2" in
    NEW)
      id="win$win"; win=$((win+1))
      echo "WINDOW NEW $id for core-$id existing (nil) newtab FALSE clone FALSE"
      echo "WINDOW SIZE $id width 800 height 600"
      if [ -n "$3" ]; then
        load "$id" "$3"
      fi
      ;;
    GO) load "$3" "$4" ;;
    RELOAD) load "$3" "about:reloaded" ;;
    STOP) echo "WINDOW STOP_THROBBER $3" ;;
    DESTROY) echo "WINDOW DESTROY $3" ;;
    REDRAW)
      echo "WINDOW REDRAW $3 START"
      echo "PLOT TEXT x 10 y 20 str Hello, world"
      echo "PLOT TEXT x 10 y 40 str second line"
      echo "PLOT BITMAP x 5 y 50 width 40 height 20"
      echo "WINDOW REDRAW $3 STOP"
      ;;
    CLICK)
      echo "LOG win $3 source input foldable FALSE level INFO message click at $5 $7"
      ;;
    EXEC)
      id=$3; shift 3
      echo "LOG win $id source js foldable FALSE level INFO message exec $*"
      ;;
    esac
    ;;
  LOGIN)
    case "$2" in
    USERNAME) echo "LOG source auth foldable FALSE level INFO message username $4" ;;
    PASSWORD) echo "LOG source auth foldable FALSE level INFO message password $4" ;;
    GO)
      echo "WINDOW SET_URL $lwin url http://auth.test/ok"
      echo "WINDOW STOP_THROBBER $lwin"
      ;;
    DESTROY) echo "WINDOW STOP_THROBBER $lwin" ;;
    esac
    ;;
  SSLCERT)
    case "$2" in
    GO)
      echo "WINDOW SET_URL $cwin url https://badcert.test/ok"
      echo "WINDOW STOP_THROBBER $cwin"
      ;;
    DESTROY) echo "WINDOW STOP_THROBBER $cwin" ;;
    esac
    ;;
  QUIT) exit 0 ;;
  esac
done
"#;

pub fn launch_stub() -> Browser {
    let config = BrowserConfig::builder()
        .executable("/bin/sh")
        .launch_options(["-c", STUB, "stub"])
        .timeout(Duration::from_secs(5))
        .build()
        .expect("stub config");
    Browser::launch(config).expect("stub child should spawn")
}
