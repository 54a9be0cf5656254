use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use atomflow::{flow, tags, AnyError, ExecError, ExecutionOptions, RunOptions, Scope, Tag};

#[tokio::test(flavor = "current_thread")]
async fn exec_with_key_runs_the_flow_body_once_per_key() {
    let scope = Scope::new();
    let ctx = scope.create_execution(ExecutionOptions::default());
    let runs = Rc::new(Cell::new(0));

    let increment = {
        let runs = runs.clone();
        flow::<(), u32>().build(move |_ctx, _input, _deps| {
            let runs = runs.clone();
            async move {
                runs.set(runs.get() + 1);
                Ok(runs.get())
            }
        })
    };

    let first = ctx
        .exec_with_key(&increment, (), Some("step".into()))
        .await
        .unwrap();
    let second = ctx
        .exec_with_key(&increment, (), Some("step".into()))
        .await
        .unwrap();

    assert_eq!(*first, 1);
    assert_eq!(*second, 1);
    assert_eq!(runs.get(), 1);

    ctx.reset_journal(None);
    let third = ctx
        .exec_with_key(&increment, (), Some("step".into()))
        .await
        .unwrap();
    assert_eq!(*third, 2);
}

#[tokio::test(flavor = "current_thread")]
async fn exec_without_a_key_never_journals() {
    let scope = Scope::new();
    let ctx = scope.create_execution(ExecutionOptions::default());
    let runs = Rc::new(Cell::new(0));

    let increment = {
        let runs = runs.clone();
        flow::<(), u32>().build(move |_ctx, _input, _deps| {
            let runs = runs.clone();
            async move {
                runs.set(runs.get() + 1);
                Ok(runs.get())
            }
        })
    };

    ctx.exec(&increment, ()).await.unwrap();
    ctx.exec(&increment, ()).await.unwrap();
    assert_eq!(runs.get(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn parallel_preserves_input_order() {
    let scope = Scope::new();
    let ctx = scope.create_execution(ExecutionOptions::default());

    let double = flow::<u32, u32>().build(|_ctx, input, _deps| async move { Ok(input * 2) });

    let results = ctx.parallel(&double, vec![1, 2, 3, 4]).await.unwrap();
    let values: Vec<u32> = results.iter().map(|r| **r).collect();
    assert_eq!(values, vec![2, 4, 6, 8]);
}

#[tokio::test(flavor = "current_thread")]
async fn parallel_fails_fast_on_the_first_error() {
    let scope = Scope::new();
    let ctx = scope.create_execution(ExecutionOptions::default());

    let maybe_fail = flow::<u32, u32>().build(|_ctx, input, _deps| async move {
        if input == 2 {
            Err(Rc::new(std::io::Error::new(std::io::ErrorKind::Other, "bad input")) as atomflow::AnyError)
        } else {
            Ok(input)
        }
    });

    let err = ctx.parallel(&maybe_fail, vec![1, 2, 3]).await.unwrap_err();
    assert!(matches!(err, ExecError::User(_)));
}

#[tokio::test(flavor = "current_thread")]
async fn parallel_settled_collects_every_outcome() {
    let scope = Scope::new();
    let ctx = scope.create_execution(ExecutionOptions::default());

    let maybe_fail = flow::<u32, u32>().build(|_ctx, input, _deps| async move {
        if input % 2 == 0 {
            Err(Rc::new(std::io::Error::new(std::io::ErrorKind::Other, "even")) as atomflow::AnyError)
        } else {
            Ok(input)
        }
    });

    let results = ctx.parallel_settled(&maybe_fail, vec![1, 2, 3, 4]).await;
    assert_eq!(results.len(), 4);
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(results[2].is_ok());
    assert!(results[3].is_err());
}

#[tokio::test(flavor = "current_thread")]
async fn cancelling_a_context_stops_further_exec_calls() {
    let scope = Scope::new();
    let ctx = scope.create_execution(ExecutionOptions::default());
    let noop = flow::<(), u32>().build(|_ctx, _input, _deps| async { Ok(0) });

    ctx.exec(&noop, ()).await.unwrap();
    ctx.cancel();

    let err = ctx.exec(&noop, ()).await.unwrap_err();
    assert!(matches!(err, ExecError::Cancelled));
}

#[tokio::test(flavor = "current_thread")]
async fn close_runs_handlers_in_reverse_and_is_idempotent() {
    let scope = Scope::new();
    let ctx = scope.create_execution(ExecutionOptions::default());
    let log = Rc::new(std::cell::RefCell::new(Vec::<&'static str>::new()));

    {
        let log = log.clone();
        ctx.on_close(move || log.borrow_mut().push("first"));
    }
    {
        let log = log.clone();
        ctx.on_close(move || log.borrow_mut().push("second"));
    }

    ctx.close().await.unwrap();
    assert_eq!(*log.borrow(), vec!["second", "first"]);

    ctx.close().await.unwrap();
    assert_eq!(*log.borrow(), vec!["second", "first"]);
}

#[tokio::test(flavor = "current_thread")]
async fn exec_fn_journals_without_a_flow() {
    let scope = Scope::new();
    let ctx = scope.create_execution(ExecutionOptions::default());
    let runs = Rc::new(Cell::new(0));

    let run_once = {
        let runs = runs.clone();
        move |_ctx: atomflow::ExecutionContext, input: u32| {
            let runs = runs.clone();
            async move {
                runs.set(runs.get() + 1);
                Ok::<u32, AnyError>(input * 2)
            }
        }
    };

    let first = ctx.exec_fn("double".to_string(), 5, run_once.clone()).await.unwrap();
    let second = ctx.exec_fn("double".to_string(), 5, run_once).await.unwrap();

    assert_eq!(*first, 10);
    assert_eq!(*second, 10);
    assert_eq!(runs.get(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn per_exec_tags_override_win_over_every_other_source() {
    let scope = Scope::new();
    let name: Tag<&'static str> = Tag::new("name");

    let ctx = scope.create_execution(ExecutionOptions::default());
    let read_name = flow::<(), &'static str>()
        .dep("n", tags::required(name.clone()))
        .build(|_ctx, _input, deps| async move { Ok(*deps.get::<&'static str>("n")) });

    let mut overrides = atomflow::TagStore::new();
    overrides.set(&name, "override");

    let result = ctx
        .exec_with_options(
            &read_name,
            (),
            RunOptions {
                tags: overrides,
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(*result, "override");
}

#[tokio::test(flavor = "current_thread")]
async fn exec_with_options_times_out_and_cancels_the_child() {
    let scope = Scope::new();
    let ctx = scope.create_execution(ExecutionOptions::default());

    let never_finishes = flow::<(), u32>().build(|_ctx, _input, _deps| async move {
        futures::future::pending::<()>().await;
        Ok(0)
    });

    let err = ctx
        .exec_with_options(
            &never_finishes,
            (),
            RunOptions {
                timeout: Some(Duration::from_millis(10)),
                ..RunOptions::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ExecError::Timeout));
}
