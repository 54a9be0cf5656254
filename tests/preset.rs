use atomflow::{atom, Preset, Scope, ScopeOptions};

#[tokio::test(flavor = "current_thread")]
async fn value_preset_bypasses_the_factory_entirely() {
    let expensive = atom::<u32>().build(|_ctx, _deps| async {
        panic!("factory should never run when a value preset is installed")
    });

    let scope = Scope::with_options(ScopeOptions {
        presets: vec![Preset::value(&expensive, 99)],
        ..Default::default()
    });

    let value = scope.resolve(&expensive).await.unwrap();
    assert_eq!(*value, 99);
}

#[tokio::test(flavor = "current_thread")]
async fn redirect_preset_resolves_and_memoizes_the_replacement() {
    let original = atom::<u32>().build(|_ctx, _deps| async { Ok(1) });
    let replacement = atom::<u32>().build(|_ctx, _deps| async { Ok(2) });

    let scope = Scope::with_options(ScopeOptions {
        presets: vec![Preset::redirect(&original, replacement.clone())],
        ..Default::default()
    });

    let via_original = scope.resolve(&original).await.unwrap();
    let via_replacement = scope.resolve(&replacement).await.unwrap();

    assert_eq!(*via_original, 2);
    assert!(std::rc::Rc::ptr_eq(&via_original, &via_replacement));
}
