use atomflow::{atom, tags, ExecutionOptions, ResolveError, Scope, ScopeOptions, Tag};

#[tokio::test(flavor = "current_thread")]
async fn missing_required_tag_fails_resolution() {
    let env: Tag<&'static str> = Tag::new("env");
    let configured = atom::<&'static str>()
        .dep("env", tags::required(env.clone()))
        .build(|_ctx, deps| async move { Ok(*deps.get::<&'static str>("env")) });

    let scope = Scope::new();
    let err = scope.resolve(&configured).await.unwrap_err();
    assert!(matches!(err, ResolveError::MissingTag("env")));
}

#[tokio::test(flavor = "current_thread")]
async fn scope_level_tag_satisfies_a_required_dependency() {
    let env: Tag<&'static str> = Tag::new("env");
    let configured = atom::<&'static str>()
        .dep("env", tags::required(env.clone()))
        .build(|_ctx, deps| async move { Ok(*deps.get::<&'static str>("env")) });

    let mut options = ScopeOptions::default();
    options.tags.set(&env, "production");
    let scope = Scope::with_options(options);

    let value = scope.resolve(&configured).await.unwrap();
    assert_eq!(*value, "production");
}

#[tokio::test(flavor = "current_thread")]
async fn optional_tag_falls_back_to_its_default() {
    let retries: Tag<u32> = Tag::with_default("retries", 3);
    let configured = atom::<u32>()
        .dep("retries", tags::optional(retries.clone()))
        .build(|_ctx, deps| async move { Ok(*deps.get::<u32>("retries")) });

    let scope = Scope::new();
    let value = scope.resolve(&configured).await.unwrap();
    assert_eq!(*value, 3);
}

#[tokio::test(flavor = "current_thread")]
async fn execution_context_local_tag_outranks_scope_tag() {
    let env: Tag<&'static str> = Tag::new("env");

    let mut options = ScopeOptions::default();
    options.tags.set(&env, "production");
    let scope = Scope::with_options(options);

    let ctx = scope.create_execution(ExecutionOptions::default());
    assert_eq!(ctx.extract(&env).unwrap(), "production");

    ctx.set(&env, "staging");
    assert_eq!(ctx.extract(&env).unwrap(), "staging");
}

#[tokio::test(flavor = "current_thread")]
async fn tags_all_collects_every_registered_value_in_write_order() {
    let plugin: Tag<&'static str> = Tag::new("plugin");

    let mut options = ScopeOptions::default();
    options.tags.set(&plugin, "metrics");
    options.tags.set(&plugin, "tracing");
    let scope = Scope::with_options(options);

    let ctx = scope.create_execution(ExecutionOptions::default());
    assert_eq!(ctx.all(&plugin), vec!["metrics", "tracing"]);
}
