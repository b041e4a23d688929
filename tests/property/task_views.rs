//! Property-based tests for the derived task views.
//!
//! Uses proptest to verify:
//! 1. Filtering keeps exactly the matching tasks, in list order.
//! 2. The completion filters partition the list.
//! 3. Statistics agree with the filters and stay within bounds.
//! 4. Patching leaves unset fields and `created_at` alone.
//! 5. Validation never accepts a blank or over-long title.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use taskdeck_proto::identity::UserId;
use taskdeck_proto::task::{
    Completion, MAX_TASK_TITLE_LENGTH, NewTask, Priority, Task, TaskFilter, TaskId, TaskPatch,
    TaskStats,
};
use taskdeck_proto::validation::validate_new_task;
use uuid::Uuid;

// --- Strategies ---

fn arb_priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Medium),
        Just(Priority::High)
    ]
}

fn arb_completion() -> impl Strategy<Value = Completion> {
    prop_oneof![
        Just(Completion::All),
        Just(Completion::Pending),
        Just(Completion::Completed)
    ]
}

fn arb_filter() -> impl Strategy<Value = TaskFilter> {
    (arb_completion(), proptest::option::of(arb_priority())).prop_map(|(completion, priority)| {
        TaskFilter {
            completion,
            priority,
        }
    })
}

fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_000_000_000).prop_map(|secs| {
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or_else(Utc::now)
    })
}

fn arb_task() -> impl Strategy<Value = Task> {
    (
        any::<u128>(),
        "[a-zA-Z0-9 ]{1,40}",
        arb_priority(),
        any::<bool>(),
        arb_timestamp(),
    )
        .prop_map(|(id, title, priority, completed, created_at)| Task {
            id: TaskId::from_uuid(Uuid::from_u128(id)),
            owner_id: UserId::from_uuid(Uuid::nil()),
            title,
            description: String::new(),
            priority,
            completed,
            created_at,
            updated_at: created_at,
        })
}

fn arb_tasks() -> impl Strategy<Value = Vec<Task>> {
    prop::collection::vec(arb_task(), 0..40)
}

fn arb_patch() -> impl Strategy<Value = TaskPatch> {
    (
        proptest::option::of("[a-z]{1,20}"),
        proptest::option::of("[a-z ]{0,20}"),
        proptest::option::of(arb_priority()),
        proptest::option::of(any::<bool>()),
    )
        .prop_map(|(title, description, priority, completed)| TaskPatch {
            title,
            description,
            priority,
            completed,
        })
}

// --- Properties ---

proptest! {
    #[test]
    fn filter_keeps_exactly_matching_tasks_in_order(tasks in arb_tasks(), filter in arb_filter()) {
        let kept = filter.apply(&tasks);
        let expected: Vec<&Task> = tasks.iter().filter(|t| filter.matches(t)).collect();
        prop_assert_eq!(kept, expected);
    }

    #[test]
    fn pending_and_completed_partition_the_list(tasks in arb_tasks()) {
        let pending = TaskFilter::completion(Completion::Pending).apply(&tasks);
        let completed = TaskFilter::completion(Completion::Completed).apply(&tasks);
        prop_assert_eq!(pending.len() + completed.len(), tasks.len());
        prop_assert!(pending.iter().all(|t| !t.completed));
        prop_assert!(completed.iter().all(|t| t.completed));
        prop_assert_eq!(TaskFilter::all().apply(&tasks).len(), tasks.len());
    }

    #[test]
    fn stats_agree_with_filters(tasks in arb_tasks()) {
        let stats = TaskStats::from_tasks(&tasks);
        prop_assert_eq!(stats.total, tasks.len());
        prop_assert_eq!(stats.completed + stats.pending, stats.total);
        prop_assert!(stats.completion_percent() <= 100);

        for priority in Priority::ALL {
            let pending = TaskFilter::completion(Completion::Pending)
                .with_priority(priority)
                .apply(&tasks)
                .len();
            prop_assert_eq!(stats.pending_by_priority.get(priority), pending);
        }
    }

    #[test]
    fn completion_percent_is_all_or_nothing_at_the_extremes(tasks in arb_tasks()) {
        let stats = TaskStats::from_tasks(&tasks);
        if stats.total > 0 && stats.completed == stats.total {
            prop_assert_eq!(stats.completion_percent(), 100);
        }
        if stats.completed == 0 {
            prop_assert_eq!(stats.completion_percent(), 0);
        }
    }

    #[test]
    fn patch_touches_only_set_fields(task in arb_task(), patch in arb_patch(), later in arb_timestamp()) {
        let mut patched = task.clone();
        patch.apply_to(&mut patched, later);

        prop_assert_eq!(patched.id, task.id);
        prop_assert_eq!(patched.owner_id, task.owner_id);
        prop_assert_eq!(patched.created_at, task.created_at);
        prop_assert_eq!(patched.updated_at, later);
        prop_assert_eq!(&patched.title, patch.title.as_ref().unwrap_or(&task.title));
        prop_assert_eq!(&patched.description, patch.description.as_ref().unwrap_or(&task.description));
        prop_assert_eq!(patched.priority, patch.priority.unwrap_or(task.priority));
        prop_assert_eq!(patched.completed, patch.completed.unwrap_or(task.completed));
    }

    #[test]
    fn blank_titles_never_validate(spaces in "[ \t\n]{0,10}", priority in arb_priority()) {
        prop_assert!(validate_new_task(&NewTask::new(spaces, priority)).is_err());
    }

    #[test]
    fn accepted_titles_are_trimmed_and_bounded(title in "\\PC{0,260}", priority in arb_priority()) {
        match validate_new_task(&NewTask::new(title.clone(), priority)) {
            Ok(clean) => {
                prop_assert_eq!(clean.title.as_str(), title.trim());
                prop_assert!(!clean.title.is_empty());
                prop_assert!(clean.title.chars().count() <= MAX_TASK_TITLE_LENGTH);
            }
            Err(_) => {
                let len = title.trim().chars().count();
                prop_assert!(len == 0 || len > MAX_TASK_TITLE_LENGTH);
            }
        }
    }
}
