use digest_core::{TaskLifecycle, TaskStatus, TransitionError};

#[test]
fn happy_path_reaches_succeeded() {
    let mut lifecycle = TaskLifecycle::new();
    assert_eq!(lifecycle.status(), TaskStatus::Pending);
    lifecycle.start().unwrap();
    assert_eq!(lifecycle.status(), TaskStatus::Running);
    lifecycle.succeed().unwrap();
    assert_eq!(lifecycle.status(), TaskStatus::Succeeded);
    assert!(lifecycle.status().is_terminal());
}

#[test]
fn failure_is_terminal() {
    let mut lifecycle = TaskLifecycle::new();
    lifecycle.start().unwrap();
    lifecycle.fail().unwrap();
    assert_eq!(
        lifecycle.succeed(),
        Err(TransitionError {
            from: TaskStatus::Failed,
            to: TaskStatus::Succeeded,
        })
    );
    assert_eq!(lifecycle.status(), TaskStatus::Failed);
}

#[test]
fn cannot_finish_without_running() {
    let mut lifecycle = TaskLifecycle::new();
    let err = lifecycle.fail().unwrap_err();
    assert_eq!(err.to_string(), "invalid task transition pending -> failed");
    assert!(lifecycle.start().is_ok());
    assert!(lifecycle.start().is_err());
}
