//! Performance benchmarks for the token and CSRF hot paths
//!
//! ```bash
//! cargo bench -p tessera-auth --bench token_bench
//! ```

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};

use tessera_auth::claims::{RotateOptions, TokenRequest, VerifyOptions};
use tessera_auth::config::SigningConfig;
use tessera_auth::csrf::CsrfGuard;
use tessera_auth::pipeline::is_token_shaped;
use tessera_auth::revocation::MemoryRevocationStore;
use tessera_auth::signing::{SigningAlgorithm, SigningContext};
use tessera_auth::{Fingerprint, TokenService};

const SECRET: &str = "benchmark-secret-benchmark-secret-0123";

fn service(algorithm: SigningAlgorithm) -> TokenService {
    let signing = SigningContext::new(&SigningConfig::hmac(algorithm, SECRET))
        .expect("valid benchmark signing config");
    TokenService::new(Arc::new(signing), Arc::new(MemoryRevocationStore::new()))
}

fn benchmark_tokens(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("tokio runtime");

    for algorithm in [SigningAlgorithm::HS256, SigningAlgorithm::HS512] {
        let tokens = service(algorithm);
        let request = TokenRequest::new("bench-user").roles(vec!["user".into()]);

        c.bench_function(&format!("token/issue_{algorithm:?}"), |b| {
            b.iter(|| black_box(tokens.issue(request.clone())))
        });

        let pair = tokens.issue(request.clone()).expect("issue");
        let options = VerifyOptions::access();
        c.bench_function(&format!("token/verify_{algorithm:?}"), |b| {
            b.iter(|| runtime.block_on(async { black_box(tokens.verify(&pair.access_token, &options).await) }))
        });
    }

    let tokens = service(SigningAlgorithm::HS256);
    c.bench_function("token/rotate_refresh", |b| {
        b.iter_batched(
            || tokens.issue(TokenRequest::new("rotator")).expect("issue"),
            |pair| {
                runtime.block_on(async {
                    black_box(
                        tokens
                            .rotate_refresh(&pair.refresh_token, &RotateOptions::default())
                            .await,
                    )
                })
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn benchmark_request_checks(c: &mut Criterion) {
    let token = CsrfGuard::generate_token();
    let presented = token.clone();
    c.bench_function("csrf/compare", |b| {
        b.iter(|| black_box(CsrfGuard::is_valid_token(&token, &presented)))
    });

    c.bench_function("csrf/generate", |b| b.iter(|| black_box(CsrfGuard::generate_token())));

    c.bench_function("fingerprint/from_user_agent_and_ip", |b| {
        b.iter(|| {
            black_box(Fingerprint::from_user_agent_and_ip(
                "Mozilla/5.0 (X11; Linux x86_64)",
                "203.0.113.10",
            ))
        })
    });

    let jwt = service(SigningAlgorithm::HS256)
        .issue(TokenRequest::new("shape"))
        .expect("issue")
        .access_token;
    c.bench_function("pipeline/token_shape", |b| b.iter(|| black_box(is_token_shaped(&jwt))));
}

criterion_group!(benches, benchmark_tokens, benchmark_request_checks);
criterion_main!(benches);
