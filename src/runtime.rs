//! Evaluator - runs a compiled node tree against a render context
//!
//! Rendering is one future walking the tree in document order. Deferred
//! values suspend it until they resolve; nothing is evaluated concurrently.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use crate::compiler::{BoundFilter, CompiledTemplate, Node};
use crate::context::Context;
use crate::diagnostics;
use crate::error::{Result, TemplateError};
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::syntax::Source;
use crate::value::{resolve, Value};

pub(crate) async fn execute(template: &CompiledTemplate, context: &Context) -> Result<String> {
    let mut evaluator = Evaluator::new(template, context);

    match evaluator.run_block(&template.nodes).await {
        Ok(()) => Ok(evaluator.out),
        Err(mut err) => {
            if template.compile_debug {
                let source = &evaluator.source;
                diagnostics::annotate(
                    &mut err,
                    &source.text,
                    source.filename.as_deref(),
                    evaluator.line,
                );
            }
            Err(err)
        }
    }
}

struct Evaluator<'a> {
    template: &'a CompiledTemplate,
    context: &'a Context,
    scopes: Vec<HashMap<String, Value>>,
    out: String,
    /// Source and line of the node being run, for error reports.
    source: Arc<Source>,
    line: usize,
}

impl<'a> Evaluator<'a> {
    fn new(template: &'a CompiledTemplate, context: &'a Context) -> Self {
        Self {
            template,
            context,
            scopes: vec![HashMap::new()],
            out: String::new(),
            source: template.source.clone(),
            line: 1,
        }
    }

    async fn run_block(&mut self, nodes: &[Node]) -> Result<()> {
        for node in nodes {
            self.run(node).await?;
        }
        Ok(())
    }

    fn run<'s>(&'s mut self, node: &'s Node) -> BoxFuture<'s, Result<()>> {
        self.run_node(node).boxed()
    }

    async fn run_node(&mut self, node: &Node) -> Result<()> {
        match node {
            Node::Text(text) => self.out.push_str(text),
            Node::Output {
                expr,
                filters,
                escape,
                line,
            } => {
                self.line = *line;
                let mut value = self.eval_value(expr).await?;
                for filter in filters {
                    value = self.apply(filter, value).await?;
                }
                let text = value.to_string();
                if *escape {
                    let escaped = (self.template.escape)(&text);
                    self.out.push_str(&escaped);
                } else {
                    self.out.push_str(&text);
                }
            }
            Node::If {
                branches,
                otherwise,
                line,
            } => {
                self.line = *line;
                let mut taken = otherwise;
                for branch in branches {
                    if self.eval_value(&branch.cond).await?.is_truthy() {
                        taken = &branch.body;
                        break;
                    }
                }
                self.run_block(taken).await?;
            }
            Node::For {
                binding,
                index,
                iterable,
                body,
                line,
            } => {
                self.line = *line;
                let entries = match self.eval_value(iterable).await? {
                    Value::Array(items) => items
                        .into_iter()
                        .enumerate()
                        .map(|(i, item)| (Value::from(i), item))
                        .collect::<Vec<_>>(),
                    Value::Object(map) => map
                        .into_iter()
                        .map(|(key, item)| (Value::String(key), item))
                        .collect(),
                    Value::String(s) => s
                        .chars()
                        .enumerate()
                        .map(|(i, c)| (Value::from(i), Value::String(c.to_string())))
                        .collect(),
                    _ => {
                        return Err(TemplateError::runtime(format!(
                            "{} is not iterable",
                            describe(iterable)
                        )))
                    }
                };

                for (key, item) in entries {
                    let mut scope = HashMap::new();
                    scope.insert(binding.clone(), item);
                    if let Some(index) = index {
                        scope.insert(index.clone(), key);
                    }
                    self.scopes.push(scope);
                    let result = self.run_block(body).await;
                    self.scopes.pop();
                    result?;
                }
            }
            Node::Let { name, expr, line } => {
                self.line = *line;
                let value = self.eval_value(expr).await?;
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone(), value);
                }
            }
            Node::Eval { expr, line } => {
                self.line = *line;
                self.eval_value(expr).await?;
            }
            Node::Include { body, source } => {
                tracing::trace!(filename = ?source.filename, "rendering include");
                let parent = std::mem::replace(&mut self.source, source.clone());
                let parent_line = std::mem::replace(&mut self.line, 1);
                // On failure the report keeps pointing into the included file.
                self.run_block(body).await?;
                self.source = parent;
                self.line = parent_line;
            }
        }
        Ok(())
    }

    async fn apply(&self, filter: &BoundFilter, value: Value) -> Result<Value> {
        let mut args = Vec::with_capacity(filter.args.len());
        for arg in &filter.args {
            args.push(self.eval_value(arg).await?);
        }
        resolve((filter.filter)(value, &args)?).await
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(name) {
                return Ok(value.clone());
            }
        }
        if self.template.bind_locals {
            if let Some(value) = self.context.lookup(name) {
                return Ok(value.clone());
            }
        }
        Err(TemplateError::runtime(format!("{} is not defined", name)))
    }

    /// Evaluate and resolve to a concrete value.
    async fn eval_value(&self, expr: &Expr) -> Result<Value> {
        resolve(self.eval(expr).await?).await
    }

    fn eval<'s>(&'s self, expr: &'s Expr) -> BoxFuture<'s, Result<Value>> {
        self.eval_expr(expr).boxed()
    }

    async fn eval_expr(&self, expr: &Expr) -> Result<Value> {
        let value = match expr {
            Expr::Literal(value) => value.clone(),
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item).await?);
                }
                Value::Array(values)
            }
            Expr::Ident(name) => self.lookup(name)?,
            Expr::This => self.context.scope.clone().unwrap_or(Value::Null),
            Expr::Locals => self.context.merged(),
            Expr::Member(target, name) => self.eval_value(target).await?.member(name)?,
            Expr::Index(target, key) => {
                let target = self.eval_value(target).await?;
                let key = self.eval_value(key).await?;
                target.index(&key)?
            }
            Expr::Call(callee, args) => {
                let Value::Function(function) = self.eval(callee).await? else {
                    return Err(TemplateError::runtime(format!(
                        "{} is not a function",
                        describe(callee)
                    )));
                };
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_value(arg).await?);
                }
                resolve(function.call(&values)?).await?
            }
            Expr::Unary(op, operand) => {
                let operand = self.eval_value(operand).await?;
                match op {
                    UnaryOp::Not => Value::Bool(!operand.is_truthy()),
                    UnaryOp::Neg => Value::Number(-number(&operand)),
                }
            }
            Expr::Binary(BinaryOp::And, left, right) => {
                let left = self.eval_value(left).await?;
                if left.is_truthy() {
                    self.eval_value(right).await?
                } else {
                    left
                }
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                let left = self.eval_value(left).await?;
                if left.is_truthy() {
                    left
                } else {
                    self.eval_value(right).await?
                }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval_value(left).await?;
                let right = self.eval_value(right).await?;
                binary(*op, &left, &right)
            }
            Expr::Conditional(cond, then, otherwise) => {
                if self.eval_value(cond).await?.is_truthy() {
                    self.eval(then).await?
                } else {
                    self.eval(otherwise).await?
                }
            }
        };
        Ok(value)
    }
}

/// Name an expression in error messages.
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::This => "this".to_string(),
        Expr::Locals => "locals".to_string(),
        Expr::Member(target, name) => format!("{}.{}", describe(target), name),
        Expr::Index(target, _) => format!("{}[...]", describe(target)),
        Expr::Call(callee, _) => format!("{}(...)", describe(callee)),
        Expr::Literal(value) => value.type_name().to_string(),
        _ => "expression".to_string(),
    }
}

fn number(value: &Value) -> f64 {
    value.as_number().unwrap_or(f64::NAN)
}

fn concatenates(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Array(_) | Value::Object(_))
}

/// Operand text for `+` concatenation. Null is spelled out here even though
/// it outputs as empty.
fn concat_text(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left.as_str(), right.as_str()) {
        (Some(a), Some(b)) => Some(a.cmp(b)),
        _ => number(left).partial_cmp(&number(right)),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    let primitive = |v: &Value| matches!(v, Value::Bool(_) | Value::Number(_) | Value::String(_));
    if std::mem::discriminant(left) == std::mem::discriminant(right) {
        left == right
    } else if primitive(left) && primitive(right) {
        number(left) == number(right)
    } else {
        false
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            _ if concatenates(left) || concatenates(right) => {
                Value::String(concat_text(left) + &concat_text(right))
            }
            _ => Value::Number(number(left) + number(right)),
        },
        BinaryOp::Sub => Value::Number(number(left) - number(right)),
        BinaryOp::Mul => Value::Number(number(left) * number(right)),
        BinaryOp::Div => Value::Number(number(left) / number(right)),
        BinaryOp::Rem => Value::Number(number(left) % number(right)),
        BinaryOp::Lt => Value::Bool(compare(left, right) == Some(Ordering::Less)),
        BinaryOp::Le => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(compare(left, right) == Some(Ordering::Greater)),
        BinaryOp::Ge => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Eq => Value::Bool(loose_eq(left, right)),
        BinaryOp::Ne => Value::Bool(!loose_eq(left, right)),
        BinaryOp::StrictEq => Value::Bool(left == right),
        BinaryOp::StrictNe => Value::Bool(left != right),
        BinaryOp::And => {
            if left.is_truthy() {
                right.clone()
            } else {
                left.clone()
            }
        }
        BinaryOp::Or => {
            if left.is_truthy() {
                left.clone()
            } else {
                right.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompileOptions};
    use crate::filters::FilterRegistry;
    use crate::loader::FsLoader;
    use crate::syntax::{Delimiters, ParseOptions};
    use serde_json::json;

    async fn render_with(text: &str, context: &Context, bind_locals: bool, debug: bool) -> Result<String> {
        let delimiters = Delimiters::default();
        let filters = FilterRegistry::new();
        let mut syntax = ParseOptions::new(&delimiters, &FsLoader);
        syntax.bind_locals = bind_locals;
        let mut options = CompileOptions::new(syntax, &filters);
        options.compile_debug = debug;
        compile(text, &options)?.render(context).await
    }

    async fn render(text: &str, context: &Context) -> Result<String> {
        render_with(text, context, true, true).await
    }

    #[tokio::test]
    async fn test_loops_and_scopes() {
        let context = Context::new().with_local(
            "users",
            Value::from(json!([{"name": "tobi"}, {"name": "loki"}])),
        );
        let html = render(
            "<% for user, i in users { %><%= i %>:<%= user.name %> <% } %>",
            &context,
        )
        .await
        .unwrap();
        assert_eq!(html, "0:tobi 1:loki ");

        let html = render("<% for c in 'abc' { %>[<%= c %>]<% } %>", &context).await.unwrap();
        assert_eq!(html, "[a][b][c]");

        let err = render("<% for user in users { %><% } %><%= user %>", &context)
            .await
            .unwrap_err();
        assert!(err.to_string().ends_with("user is not defined"));
    }

    #[tokio::test]
    async fn test_conditionals_and_let() {
        let context = Context::new().with_local("count", 3);
        let html = render(
            "<% let label = count > 1 ? 'items' : 'item' %><% if count == '3' { %><%= count %> <%= label %><% } else { %>other<% } %>",
            &context,
        )
        .await
        .unwrap();
        assert_eq!(html, "3 items");
    }

    #[tokio::test]
    async fn test_operators() {
        let html = render(
            "<%= 1 + 2 * 3 %>|<%= 'a' + 1 %>|<%= 7 % 4 %>|<%= 2 > 1 && 'yes' %>|<%= null || 'fallback' %>|<%= !0 %>|<%= 1 === '1' %>",
            &Context::new(),
        )
        .await
        .unwrap();
        assert_eq!(html, "7|a1|3|yes|fallback|true|false");
    }

    #[tokio::test]
    async fn test_coercion_edges() {
        let html = render(
            "<%= -0 %>|<%= '' == 0 %>|<%= ' ' == false %>|<%= null + 'x' %>|<%= 'x' + null %>|<%= null + 1 %>|<%= 1e21 %>|<%= 'b' > 'a' %>",
            &Context::new(),
        )
        .await
        .unwrap();
        assert_eq!(html, "0|true|true|nullx|xnull|1|1e+21|true");
    }

    #[tokio::test]
    async fn test_calls_and_deferreds() {
        let context = Context::new()
            .with_local(
                "greet",
                Value::function(|args| Ok(Value::from(format!("hi {}", args[0])))),
            )
            .with_local("later", Value::deferred(|| async { Ok::<_, TemplateError>(Value::from("resolved")) }))
            .with_local("thunk", Value::function(|_| Ok(Value::from(42))));

        let html = render("<%= greet('tobi') %> <%= later %> <%= thunk %>", &context)
            .await
            .unwrap();
        assert_eq!(html, "hi tobi resolved 42");

        let err = render("<%= later() %>", &context).await.unwrap_err();
        assert!(err.to_string().ends_with("later is not a function"));
    }

    #[tokio::test]
    async fn test_this_and_locals() {
        let context = Context::new()
            .with_data("title", "Home")
            .with_local("name", "tobi")
            .with_scope(Value::from(json!({"site": "example"})));

        let html = render("<%= this.site %>/<%= locals.title %>/<%= name %>", &context)
            .await
            .unwrap();
        assert_eq!(html, "example/Home/tobi");

        let html = render_with("<%= locals.name %>", &context, false, true).await.unwrap();
        assert_eq!(html, "tobi");
        let err = render_with("<%= name %>", &context, false, true).await.unwrap_err();
        assert!(err.to_string().ends_with("name is not defined"));
    }

    #[tokio::test]
    async fn test_runtime_errors_are_annotated() {
        let err = render("<ul>\n  <%= user.name %>\n</ul>", &Context::new().with_local("user", Value::Null))
            .await
            .unwrap_err();
        assert!(err.is_runtime());
        assert_eq!(
            err.to_string(),
            "ejs:2\n    1| <ul>\n >> 2|   <%= user.name %>\n    3| </ul>\n\nCannot read property 'name' of null"
        );

        let err = render_with("<ul>\n  <%= user.name %>\n</ul>", &Context::new(), true, false)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "user is not defined");
    }
}
