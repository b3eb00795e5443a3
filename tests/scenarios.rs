// セッション全体を擬似シリアルポートで駆動する結合テスト。
use std::cell::RefCell;
use std::rc::Rc;
use wisun_broute::serial::FakeSerialPort;
use wisun_broute::state::comm::CommState;
use wisun_broute::state::init::InitState;
use wisun_broute::Session;

const ROUTE_B_ID: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
const ROUTE_B_PASSWORD: &str = "BBBBBBBBBBBB";

const SELF_IPV6: &str = "FE80:0000:0000:0000:0000:0000:0000:0002";
const MODULE_IPV6: &str = "FE80:0000:0000:0000:0000:0000:0000:0001";

fn new_session(port: FakeSerialPort) -> Session {
    Session::new(ROUTE_B_ID, ROUTE_B_PASSWORD, Box::new(port)).unwrap()
}

/// 係数(0xD3)と積算電力量単位(0xE1)をそれぞれ1バイトだけ持つ、
/// Get_res応答フレームの生バイト列を16進文字列にしたもの。
fn initial_params_payload_hex() -> String {
    "1081000102880105FF017202D30101E10101".to_string()
}

fn erxudp_line() -> String {
    format!(
        "ERXUDP {SELF_IPV6} {MODULE_IPV6} 0E1A 0E1A 0000000000000000 1 0012 {}",
        initial_params_payload_hex()
    )
}

/// 初期化シーケンスの冒頭(echo無効化からSKINFO/SKVER/パスワード/IDまで)。
/// どのシナリオでも共通の前置き。
fn handshake_lines() -> Vec<String> {
    vec![
        "SKSREG SFE 0".to_string(),
        "OK".to_string(),
        "EINFO FE80:0000:0000:0000:0000:0000:0000:0001 001D129012345678 21 0001 1234".to_string(),
        "OK".to_string(),
        "EVER 1.2.10".to_string(),
        "OK".to_string(),
        "OK".to_string(),
        "OK".to_string(),
        "OK 01".to_string(), // ROPT応答、WOPTを飛ばす
        "OK".to_string(),
    ]
}

/// ビーコン受信からEPANDESCブロックの正常な6行まで。
fn scan_and_epandesc_lines() -> Vec<String> {
    vec![
        format!("EVENT 20 {SELF_IPV6}"),
        "EPANDESC".to_string(),
        "  Channel:21".to_string(),
        "  Channel Page:09".to_string(),
        "  Pan ID:0001".to_string(),
        "  Addr:001D129012345678".to_string(),
        "  LQI:E1".to_string(),
        "  PairID:12345678".to_string(),
        format!("EVENT 22 {SELF_IPV6}"),
    ]
}

/// convertAddr以降、PANA成功と初期パラメータ取得までの残り。
fn join_and_initial_params_lines() -> Vec<String> {
    vec![
        SELF_IPV6.to_string(), // SKLL64応答(39文字)
        "OK".to_string(),      // SetChannel
        "OK".to_string(),      // SetPanId
        "OK".to_string(),      // SkJoin
        format!("EVENT 25 {SELF_IPV6}"),
        "OK".to_string(),
        format!("EVENT 21 {SELF_IPV6} 00"),
        erxudp_line(),
    ]
}

fn happy_path_lines() -> Vec<String> {
    let mut lines = handshake_lines();
    lines.extend(scan_and_epandesc_lines());
    lines.extend(join_and_initial_params_lines());
    lines
}

fn run_to_terminal(session: &mut Session, max_ticks: usize) -> bool {
    for _ in 0..max_ticks {
        if session.initialize_tick().unwrap() {
            return true;
        }
    }
    false
}

#[test]
fn happy_path_join_reaches_terminal_state() {
    let mut port = FakeSerialPort::new();
    port.push_lines(happy_path_lines());
    let mut session = new_session(port);

    assert!(run_to_terminal(&mut session, 60));
    assert_eq!(session.get_init_state(), InitState::ReadySmartMeter);
}

#[test]
fn scan_with_empty_pass_escalates_and_still_progresses() {
    let mut port = FakeSerialPort::new();

    let mut first_pass = handshake_lines();
    // 最初のスキャン周ではScanDoneのみでビーコンを受信しない。
    first_pass.push(format!("EVENT 22 {SELF_IPV6}"));
    port.push_lines(first_pass);

    // 2回目のスキャン要求への応答(ここから先は通常の成功パス)。
    let mut second_pass = vec!["OK".to_string()];
    second_pass.extend(scan_and_epandesc_lines());
    second_pass.extend(join_and_initial_params_lines());
    port.push_lines(second_pass);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    let mut session = new_session(port);
    session.set_status_change_callback(move |state| seen_clone.borrow_mut().push(state));

    assert!(run_to_terminal(&mut session, 80));
    assert_eq!(session.get_init_state(), InitState::ReadySmartMeter);

    // 空振りのScanDoneの後、activeScanWithIEへ戻って2回目のスキャンが走っている。
    let states = seen.borrow();
    let scan_visits = states.iter().filter(|s| **s == InitState::ActiveScanWithIe).count();
    assert!(
        scan_visits >= 2,
        "expected the scan to be retried at least once, saw: {states:?}"
    );
}

#[test]
fn pana_failure_once_retries_without_rescanning() {
    let mut port = FakeSerialPort::new();

    let mut lines = handshake_lines();
    lines.extend(scan_and_epandesc_lines());
    lines.push(SELF_IPV6.to_string()); // SKLL64応答
    lines.push("OK".to_string()); // SetChannel
    lines.push("OK".to_string()); // SetPanId
    lines.push("OK".to_string()); // SkJoin
    lines.push(format!("EVENT 24 {SELF_IPV6}")); // 1回目のPANAは失敗する
    // convertAddrからやり直す。ビーコン待ちへは戻らない。
    lines.push(SELF_IPV6.to_string());
    lines.push("OK".to_string());
    lines.push("OK".to_string());
    lines.push("OK".to_string());
    lines.push(format!("EVENT 25 {SELF_IPV6}"));
    lines.push("OK".to_string());
    lines.push(format!("EVENT 21 {SELF_IPV6} 00"));
    lines.push(erxudp_line());
    port.push_lines(lines);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    let mut session = new_session(port);
    session.set_status_change_callback(move |state| seen_clone.borrow_mut().push(state));

    assert!(run_to_terminal(&mut session, 80));
    assert_eq!(session.get_init_state(), InitState::ReadySmartMeter);

    let states = seen.borrow();
    let scan_visits = states.iter().filter(|s| **s == InitState::ActiveScanWithIe).count();
    assert_eq!(scan_visits, 1, "PANA failure must not trigger a rescan, saw: {states:?}");
}

#[test]
fn wopt_already_set_skips_write_opt_state() {
    let mut port = FakeSerialPort::new();
    port.push_lines(happy_path_lines());

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    let mut session = new_session(port);
    session.set_status_change_callback(move |state| seen_clone.borrow_mut().push(state));

    assert!(run_to_terminal(&mut session, 60));

    let states = seen.borrow();
    assert!(!states.contains(&InitState::WriteOpt));
    assert!(!states.contains(&InitState::WaitWriteOpt));
    assert!(states.contains(&InitState::ActiveScanWithIe));
}

#[test]
fn malformed_epandesc_key_returns_to_active_scan() {
    let mut port = FakeSerialPort::new();
    let mut lines = handshake_lines();
    lines.push(format!("EVENT 20 {SELF_IPV6}"));
    lines.push("EPANDESC".to_string());
    lines.push("  Channel:21".to_string());
    lines.push("  Channel Page:09".to_string());
    // "Pan ID:" のはずが "PanID:" に化けている。
    lines.push("  PanID:0001".to_string());
    port.push_lines(lines);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    let mut session = new_session(port);
    session.set_status_change_callback(move |state| seen_clone.borrow_mut().push(state));

    for _ in 0..20 {
        session.initialize_tick().unwrap();
    }

    // activeScanWithIEへ戻って新しいSKSCANを発行し、その応答待ちで止まっている。
    assert!(seen.borrow().contains(&InitState::ActiveScanWithIe));
    assert_eq!(session.get_init_state(), InitState::WaitActiveScanWithIeOk);
}

#[test]
fn udp_echo_after_send_is_delivered_exactly_once() {
    let mut port = FakeSerialPort::new();
    let mut lines = happy_path_lines();
    // 結合後に自分から送るプロパティ要求に対する、スマートメーター側の応答。
    lines.push("OK".to_string());
    lines.push(format!("EVENT 21 {SELF_IPV6} 00"));
    lines.push(erxudp_line());
    port.push_lines(lines);

    let mut session = new_session(port);
    assert!(run_to_terminal(&mut session, 60));
    assert_eq!(session.get_init_state(), InitState::ReadySmartMeter);

    session.send_property_request(&[0xE7]).unwrap();
    assert_eq!(session.get_comm_state(), CommState::WaitSuccessUdpSend);

    let received = Rc::new(RefCell::new(0));
    let received_clone = received.clone();
    let mut ready = false;
    for _ in 0..20 {
        ready = session
            .communication_tick(|_frame| {
                *received_clone.borrow_mut() += 1;
            })
            .unwrap();
        if ready {
            break;
        }
    }

    assert!(ready);
    assert_eq!(*received.borrow(), 1);
    assert_eq!(session.get_comm_state(), CommState::Ready);
}
