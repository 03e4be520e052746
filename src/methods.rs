//! Named remote-callable methods (`models.<schema>.do.<op>`) with JSON argument dispatch.

use crate::error::ShelfError;
use crate::format::{BrowseQuery, Options, Row};
use crate::model::{Model, Operations};
use crate::schema::OpKind;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[async_trait]
pub trait Method: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, ShelfError>;
}

/// Adapts a plain closure into a [`Method`].
pub struct FnMethod<F>(pub F);

#[async_trait]
impl<F> Method for FnMethod<F>
where
    F: Fn(Value) -> Result<Value, ShelfError> + Send + Sync,
{
    async fn call(&self, args: Value) -> Result<Value, ShelfError> {
        (self.0)(args)
    }
}

pub fn method_name(schema: &str, op: &str) -> String {
    format!("models.{}.do.{}", schema, op)
}

/// JSON arguments of a generated method. Each operation reads the fields it needs.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallArgs {
    pub query: BrowseQuery,
    pub params: Option<Row>,
    pub payload: Row,
    pub multiple: bool,
    pub require: bool,
}

impl CallArgs {
    pub fn parse(value: Value) -> Result<Self, ShelfError> {
        match value {
            Value::Null => Ok(CallArgs::default()),
            Value::Object(_) => Ok(serde_json::from_value(value)?),
            _ => Err(ShelfError::BadRequest("method arguments must be a JSON object".into())),
        }
    }

    fn options<A: Send + 'static>(&self) -> Options<A> {
        Options {
            multiple: self.multiple,
            require: self.require,
            ..Options::default()
        }
    }
}

pub(crate) struct OperationMethod {
    pub model: Arc<Model>,
    pub op: OpKind,
}

#[async_trait]
impl Method for OperationMethod {
    async fn call(&self, args: Value) -> Result<Value, ShelfError> {
        let args = CallArgs::parse(args)?;
        let model = &self.model;
        match self.op {
            OpKind::Browse => {
                let result = model.browse(args.query.clone(), args.options()).await?;
                Ok(serde_json::to_value(result)?)
            }
            OpKind::Obtain => {
                let row = model.obtain(args.params.clone(), args.options()).await?;
                Ok(row.unwrap_or(Value::Null))
            }
            OpKind::Create => model.create(args.payload.clone(), args.options()).await,
            OpKind::Update => {
                let params = args.params.clone().unwrap_or_default();
                model.update(params, args.payload.clone(), args.options()).await
            }
            OpKind::Delete => {
                let params = args.params.clone().unwrap_or_default();
                model.delete(params, args.options()).await
            }
            OpKind::Scrimp => model.scrimp(args.payload.clone(), args.options()).await,
        }
    }
}

pub(crate) struct CustomMethod {
    pub model: Arc<Model>,
    pub name: String,
}

#[async_trait]
impl Method for CustomMethod {
    async fn call(&self, args: Value) -> Result<Value, ShelfError> {
        self.model.call(&self.name, args).await
    }
}

/// `models.<schema>.schema`: the bound table spec.
pub(crate) struct SchemaMethod(pub Arc<Model>);

#[async_trait]
impl Method for SchemaMethod {
    async fn call(&self, _args: Value) -> Result<Value, ShelfError> {
        Ok(serde_json::to_value(self.0.spec())?)
    }
}

/// `models.<schema>.columnInfo`: live columns from the store.
pub(crate) struct ColumnInfoMethod(pub Arc<Model>);

#[async_trait]
impl Method for ColumnInfoMethod {
    async fn call(&self, _args: Value) -> Result<Value, ShelfError> {
        Ok(serde_json::to_value(self.0.column_info().await?)?)
    }
}
