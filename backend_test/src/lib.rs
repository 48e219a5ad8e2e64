use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one, inject dependencies,
/// and ensure that the workspace is removed regardless of how the test terminates.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`],
/// `crate::store::Store` (the in-memory store behind the client), and
/// `crate::Workspace` (a temporary directory holding the elections directory
/// and the fake teller programs).
#[proc_macro_attribute]
pub fn backend_test(_args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract type information and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone()) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// Test setup.
            async fn setup(
                workspace: &std::path::Path,
            ) -> (rocket::local::asynchronous::Client, crate::store::Store) {
                let store: crate::store::Store =
                    std::sync::Arc::new(crate::store::MemoryStore::new());
                let config = crate::Config::example(workspace);
                let rocket_client = rocket::local::asynchronous::Client::tracked(
                    crate::rocket_for_store(store.clone(), config),
                )
                .await
                .unwrap();

                (rocket_client, store)
            }

            /// The test itself.
            #item_fn

            /// Test cleanup.
            fn cleanup(workspace: tempfile::TempDir) {
                let path = workspace.path().to_path_buf();
                if let Err(e) = workspace.close() {
                    eprintln!("Failed to remove test workspace {}: {e}", path.display());
                }
            }

            log4rs_test_utils::test_logging::init_logging_once_for(["vmv_backend"], None, None);

            // Create an async runtime. We need a separate one for inside and
            // outside the `catch_unwind`.
            let outer_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-setup-cleanup")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let inner_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let workspace = tempfile::tempdir().unwrap();
            let workspace_path: crate::Workspace = workspace.path().to_path_buf();
            let (rocket_client, store) = outer_runtime.block_on(setup(&workspace_path));

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let client_mutex = std::sync::Mutex::new(rocket_client);
            let store_mutex = std::sync::Mutex::new(store);
            let runtime_mutex = std::sync::Mutex::new(inner_runtime);
            let result = std::panic::catch_unwind(|| {
                #[allow(unused_variables)]
                let rocket_client = client_mutex.into_inner().unwrap();
                #[allow(unused_variables)]
                let store = store_mutex.into_inner().unwrap();
                let runtime = runtime_mutex.into_inner().unwrap();

                runtime.block_on(#new_name(#(#test_args),*));

                // Dropping the runtime kills any teller still running.
                drop(runtime);
            });

            // Run the cleanup.
            cleanup(workspace);

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::panic_any(cause);
            }
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut has_client = false;
    let mut has_store = false;
    let mut has_workspace = false;
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let Pat::Ident(_) = &*pat_type.pat {
                if let Type::Path(type_path) = &*pat_type.ty {
                    if let Some(type_ident) = type_path.path.get_ident() {
                        let (seen, arg) = if type_ident == "Client" {
                            (&mut has_client, quote! { rocket_client })
                        } else if type_ident == "Store" {
                            (&mut has_store, quote! { store.clone() })
                        } else if type_ident == "Workspace" {
                            (&mut has_workspace, quote! { workspace_path.clone() })
                        } else {
                            return Err(unexpected(input.span()));
                        };
                        if *seen {
                            return Err(syn::Error::new(
                                input.span(),
                                format!("Test cannot accept more than one `{type_ident}`"),
                            ));
                        }
                        *seen = true;
                        args.push(arg);
                        continue;
                    }
                }
            }
        }

        return Err(unexpected(input.span()));
    }

    Ok(args)
}

fn unexpected(span: proc_macro2::Span) -> syn::Error {
    syn::Error::new(
        span,
        "Expected one of `client_ident: Client`, `store_ident: Store` or `dir_ident: Workspace`",
    )
}
