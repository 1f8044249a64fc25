use crate::types::*;

#[test]
fn test_task_kind_serde() {
    let json = serde_json::to_string(&TaskKind::Cached).unwrap();
    assert_eq!(json, "\"CACHED\"");
    let back: TaskKind = serde_json::from_str(&json).unwrap();
    assert_eq!(back, TaskKind::Cached);
}

#[test]
fn test_play_mode_default() {
    assert_eq!(PlayMode::default(), PlayMode::Fifo);
}

#[test]
fn test_destination_defaults() {
    let json = r#"{"ip":"10.0.0.1","port":6000,"audio_ssrc":4660,"audio_pt":111,"bitrate":96000}"#;
    let dest: StreamDestination = serde_json::from_str(json).unwrap();
    assert_eq!(dest.port, 6000);
    assert_eq!(dest.rtcp_port, 0);
    assert!(!dest.rtcp_mux);
}

#[test]
fn test_file_task_constructor() {
    let task = TaskItem::file("t1", "http://host/a.mp3");
    assert_eq!(task.kind, TaskKind::File);
    assert!(!task.stream_mode);
}
