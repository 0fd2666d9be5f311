//! Sample service implementations.

use std::time::Duration;

use async_trait::async_trait;
use crosstalk::{
    ReplyStatus,
    codec::CodecResult,
    server::{Query, ServiceInvoker},
};

use crate::types::{Family, Person};

/// Completes `query` with `GARBAGE_ARGS` and the decode error as hint.
fn garbage_args(query: Query, err: &crosstalk::CodecError) {
    query.complete(ReplyStatus::GarbageArgs, &err.to_string());
}

/// `calc`: arithmetic over positional arguments.
pub struct CalcService;

fn decode_add(query: &mut Query) -> CodecResult<(i32, i32)> {
    let a = query.param()?;
    let b = query.param()?;
    query.params_done()?;
    Ok((a, b))
}

fn decode_test_me(query: &mut Query) -> CodecResult<(i32, f64, String)> {
    let a = query.param()?;
    let b = query.param()?;
    let c = query.param()?;
    query.params_done()?;
    Ok((a, b, c))
}

#[async_trait]
impl ServiceInvoker for CalcService {
    fn name(&self) -> &str { "calc" }

    fn class_name(&self) -> &str { "Calculator" }

    async fn call(&self, mut query: Query) -> bool {
        match query.method() {
            "Add" => match decode_add(&mut query) {
                Ok((a, b)) => query.complete_ok(&(a + b)),
                Err(err) => garbage_args(query, &err),
            },
            "TestMe" => match decode_test_me(&mut query) {
                Ok((a, b, _text)) => query.complete_ok(&(a + b as i32)),
                Err(err) => garbage_args(query, &err),
            },
            _ => query.complete_status(ReplyStatus::ProcUnavailable),
        }
        true
    }
}

/// `echo`: returns composite arguments unchanged.
pub struct EchoService;

fn decode_set_family(query: &mut Query) -> CodecResult<(Person, Person, Vec<Person>)> {
    let mother = query.param()?;
    let father = query.param()?;
    let children = query.param()?;
    query.params_done()?;
    Ok((mother, father, children))
}

#[async_trait]
impl ServiceInvoker for EchoService {
    fn name(&self) -> &str { "echo" }

    fn class_name(&self) -> &str { "Echo" }

    async fn call(&self, mut query: Query) -> bool {
        match query.method() {
            "SetFamily" => match decode_set_family(&mut query) {
                Ok((mother, father, children)) => query.complete_ok(&Family {
                    mother,
                    father,
                    children,
                }),
                Err(err) => garbage_args(query, &err),
            },
            "EchoString" => {
                let text: CodecResult<String> = (|| {
                    let text = query.param()?;
                    query.params_done()?;
                    Ok(text)
                })();
                match text {
                    Ok(text) => query.complete_ok(&text),
                    Err(err) => garbage_args(query, &err),
                }
            }
            _ => query.complete_status(ReplyStatus::ProcUnavailable),
        }
        true
    }
}

/// `delay`: completes after a caller-chosen pause.
pub struct DelayService;

fn decode_delay(query: &mut Query) -> CodecResult<(i64, i32)> {
    let delay_ms = query.param()?;
    let value = query.param()?;
    query.params_done()?;
    Ok((delay_ms, value))
}

#[async_trait]
impl ServiceInvoker for DelayService {
    fn name(&self) -> &str { "delay" }

    fn class_name(&self) -> &str { "Delayer" }

    async fn call(&self, mut query: Query) -> bool {
        match query.method() {
            "DelayReturn" => match decode_delay(&mut query) {
                Ok((delay_ms, value)) => {
                    tokio::time::sleep(Duration::from_millis(delay_ms.max(0) as u64)).await;
                    query.complete_ok(&value);
                }
                Err(err) => garbage_args(query, &err),
            },
            _ => query.complete_status(ReplyStatus::ProcUnavailable),
        }
        true
    }
}
