use forge_core::task::{CaseResult, JudgeResult, SubtaskResult};
use forge_core::JudgeStatus;

// the server renders the record live, so the JSON shape and the
// status strings are a compatibility surface
#[test]
fn progressive_record_wire_shape() {
    let mut result = JudgeResult::new();
    result.status = JudgeStatus::Running {
        subtask: Some(2),
        case: 1,
    };
    result.score = 30;
    result.case_num = 3;
    result.subtasks = Some(vec![SubtaskResult {
        case_num: 2,
        status: JudgeStatus::Accepted,
        score: Some(30.0),
        cases: vec![CaseResult {
            status: JudgeStatus::Accepted,
            time_used: 12,
            memory_used: 1024,
            input: "1 2".into(),
            user_out: "3".into(),
            answer: "3".into(),
            score: 100.0,
            spj_message: None,
        }],
        pending: false,
    }]);

    let v = serde_json::to_value(&result).unwrap();
    assert_eq!(v["status"], "Running on #2.1");
    assert_eq!(v["score"], 30);
    assert_eq!(v["case_num"], 3);
    assert_eq!(v["pending"], true);

    let subtask = &v["subtasks"][0];
    assert_eq!(subtask["status"], "Accepted");
    assert_eq!(subtask["score"], 30.0);
    assert_eq!(subtask["pending"], false);

    let case = &subtask["cases"][0];
    assert_eq!(case["time_used"], 12);
    assert_eq!(case["user_out"], "3");
    // absent optional fields stay off the wire entirely
    assert!(case.get("spj_message").is_none());
}

#[test]
fn fresh_record_is_pending_waiting() {
    let v = serde_json::to_value(&JudgeResult::new()).unwrap();
    assert_eq!(v["status"], "Waiting");
    assert_eq!(v["pending"], true);
    assert!(v.get("subtasks").is_none());
    assert_eq!(v["compiler_output"], "");
}
