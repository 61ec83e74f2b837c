use super::converter::ConverterLookup;
use super::core::{ParamResolver, ParamResolverFactory, ResolveContext};
use super::param::{DefaultValue, Param, ParamSource, ParamType};
use crate::error::BuildError;
use crate::exception::Failure;
use crate::http::RequestContext;
use serde_json::Value;
use std::sync::Arc;

/// Binding contract shared by every single-value resolver: a name, whether the value is
/// required, and a lazy default
#[derive(Clone)]
pub struct NameAndValue {
    pub name: Arc<str>,
    pub required: bool,
    pub default: Option<DefaultValue>,
}

impl NameAndValue {
    pub fn from_param(param: &Param) -> Self {
        Self {
            name: Arc::clone(param.name()),
            required: param.is_required(),
            default: param.default().cloned(),
        }
    }

    /// Apply the absent-value rules: default first, then `MissingRequiredValue` when required,
    /// otherwise `null`
    pub fn or_absent(&self, value: Option<Value>) -> Result<Value, Failure> {
        match value {
            Some(v) => Ok(v),
            None => match &self.default {
                Some(supplier) => Ok(supplier()),
                None if self.required => Err(Failure::missing_required(&self.name)),
                None => Ok(Value::Null),
            },
        }
    }
}

type RawLookup = for<'r> fn(&'r RequestContext, &str) -> Vec<&'r str>;

fn path_values<'r>(ctx: &'r RequestContext, name: &str) -> Vec<&'r str> {
    ctx.path_param(name).into_iter().collect()
}

fn query_values<'r>(ctx: &'r RequestContext, name: &str) -> Vec<&'r str> {
    ctx.query_param_values(name)
}

fn header_values<'r>(ctx: &'r RequestContext, name: &str) -> Vec<&'r str> {
    ctx.headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .collect()
}

fn cookie_values<'r>(ctx: &'r RequestContext, name: &str) -> Vec<&'r str> {
    ctx.cookie(name).into_iter().collect()
}

fn matrix_values<'r>(ctx: &'r RequestContext, name: &str) -> Vec<&'r str> {
    ctx.matrix_params
        .iter()
        .filter(|(k, _)| k.as_ref() == name)
        .map(|(_, v)| v.as_str())
        .collect()
}

/// Resolves a named string value from one request location and converts it to the declared
/// type
pub struct NamedValueResolver {
    nv: NameAndValue,
    ty: ParamType,
    converters: Arc<ConverterLookup>,
    lookup: RawLookup,
}

impl ParamResolver for NamedValueResolver {
    fn resolve(&self, ctx: &mut ResolveContext<'_>) -> Result<Value, Failure> {
        let raw = (self.lookup)(&*ctx.request, &self.nv.name);
        if raw.is_empty() {
            return self.nv.or_absent(None);
        }
        let value = self
            .converters
            .convert_all(&self.ty, &raw)
            .map_err(|e| Failure::conversion(&self.nv.name, e))?;
        self.nv.or_absent(Some(value))
    }
}

/// Request attributes are already values; strings are still converted
pub struct AttributeResolver {
    nv: NameAndValue,
    ty: ParamType,
    converters: Arc<ConverterLookup>,
}

impl ParamResolver for AttributeResolver {
    fn resolve(&self, ctx: &mut ResolveContext<'_>) -> Result<Value, Failure> {
        let value = match ctx.request.attribute(&self.nv.name) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if !matches!(self.ty.value_type(), ParamType::String) => Some(
                self.converters
                    .convert(&self.ty, s)
                    .map_err(|e| Failure::conversion(&self.nv.name, e))?,
            ),
            Some(v) => Some(v.clone()),
        };
        self.nv.or_absent(value)
    }
}

/// Factory for the single-value sources: path, query, header, cookie, attribute, matrix
pub struct NamedValueResolverFactory {
    source: ParamSource,
    order: i32,
}

impl NamedValueResolverFactory {
    pub fn path() -> Self {
        Self {
            source: ParamSource::Path,
            order: 100,
        }
    }

    pub fn query() -> Self {
        Self {
            source: ParamSource::Query,
            order: 200,
        }
    }

    pub fn header() -> Self {
        Self {
            source: ParamSource::Header,
            order: 300,
        }
    }

    pub fn cookie() -> Self {
        Self {
            source: ParamSource::Cookie,
            order: 400,
        }
    }

    pub fn attribute() -> Self {
        Self {
            source: ParamSource::Attribute,
            order: 500,
        }
    }

    pub fn matrix() -> Self {
        Self {
            source: ParamSource::Matrix,
            order: 600,
        }
    }
}

impl ParamResolverFactory for NamedValueResolverFactory {
    fn supports(&self, param: &Param) -> bool {
        param.source() == self.source
    }

    fn create_resolver(
        &self,
        param: &Param,
        converters: &Arc<ConverterLookup>,
    ) -> Result<Arc<dyn ParamResolver>, BuildError> {
        if !converters.supports(param.param_type()) {
            return Err(BuildError::NoConverter {
                handler: param.owner().unwrap_or("").to_string(),
                param: param.name().to_string(),
                type_name: param.param_type().to_string(),
            });
        }
        let nv = NameAndValue::from_param(param);
        let ty = param.param_type().clone();
        let converters = Arc::clone(converters);
        let lookup: RawLookup = match self.source {
            ParamSource::Path => path_values,
            ParamSource::Query => query_values,
            ParamSource::Header => header_values,
            ParamSource::Cookie => cookie_values,
            ParamSource::Matrix => matrix_values,
            _ => {
                return Ok(Arc::new(AttributeResolver { nv, ty, converters }));
            }
        };
        Ok(Arc::new(NamedValueResolver {
            nv,
            ty,
            converters,
            lookup,
        }))
    }

    fn order(&self) -> i32 {
        self.order
    }
}

/// Binds the request id as a string
pub struct RequestIdResolverFactory;

struct RequestIdResolver;

impl ParamResolver for RequestIdResolver {
    fn resolve(&self, ctx: &mut ResolveContext<'_>) -> Result<Value, Failure> {
        Ok(Value::String(ctx.request.request_id.to_string()))
    }
}

impl ParamResolverFactory for RequestIdResolverFactory {
    fn supports(&self, param: &Param) -> bool {
        param.source() == ParamSource::RequestId
    }

    fn create_resolver(
        &self,
        _param: &Param,
        _converters: &Arc<ConverterLookup>,
    ) -> Result<Arc<dyn ParamResolver>, BuildError> {
        Ok(Arc::new(RequestIdResolver))
    }

    fn order(&self) -> i32 {
        700
    }
}

/// Binds the failure being handled in an error handler
pub struct FailureResolverFactory;

struct FailureResolver {
    nv: NameAndValue,
    as_message: bool,
}

impl ParamResolver for FailureResolver {
    fn resolve(&self, ctx: &mut ResolveContext<'_>) -> Result<Value, Failure> {
        let value = ctx.failure.map(|f| {
            if self.as_message {
                Value::String(f.message().to_string())
            } else {
                f.to_json()
            }
        });
        self.nv.or_absent(value)
    }
}

impl ParamResolverFactory for FailureResolverFactory {
    fn supports(&self, param: &Param) -> bool {
        param.source() == ParamSource::Failure
    }

    fn create_resolver(
        &self,
        param: &Param,
        _converters: &Arc<ConverterLookup>,
    ) -> Result<Arc<dyn ParamResolver>, BuildError> {
        Ok(Arc::new(FailureResolver {
            nv: NameAndValue::from_param(param),
            as_message: matches!(param.param_type().value_type(), ParamType::String),
        }))
    }

    fn order(&self) -> i32 {
        800
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::{CONVERSION_FAILURE, MISSING_REQUIRED_VALUE};
    use http::Method;
    use serde_json::json;

    fn resolve(factory: &dyn ParamResolverFactory, param: &Param, req: &mut RequestContext) -> Result<Value, Failure> {
        let converters = Arc::new(ConverterLookup::new());
        let resolver = factory.create_resolver(param, &converters).unwrap();
        resolver.resolve(&mut ResolveContext {
            request: req,
            failure: None,
        })
    }

    #[test]
    fn test_missing_required_vs_default() {
        let factory = NamedValueResolverFactory::query();
        let mut req = RequestContext::new(Method::GET, "/greet");

        let required = Param::query("name");
        let err = resolve(&factory, &required, &mut req).unwrap_err();
        assert!(err.is(&MISSING_REQUIRED_VALUE));

        let defaulted = Param::query("name").default_value(json!("world"));
        assert_eq!(resolve(&factory, &defaulted, &mut req).unwrap(), json!("world"));

        let optional = Param::query("name").of(ParamType::optional(ParamType::String));
        assert_eq!(resolve(&factory, &optional, &mut req).unwrap(), Value::Null);
    }

    #[test]
    fn test_query_conversion_and_lists() {
        let factory = NamedValueResolverFactory::query();
        let mut req = RequestContext::new(Method::GET, "/items?limit=10&tag=a&tag=b,c");
        let limit = Param::query("limit").of(ParamType::U64);
        assert_eq!(resolve(&factory, &limit, &mut req).unwrap(), json!(10));
        let tags = Param::query("tag").of(ParamType::list(ParamType::String));
        assert_eq!(resolve(&factory, &tags, &mut req).unwrap(), json!(["a", "b", "c"]));

        let mut bad = RequestContext::new(Method::GET, "/items?limit=ten");
        let err = resolve(&factory, &limit, &mut bad).unwrap_err();
        assert!(err.is(&CONVERSION_FAILURE));
    }

    #[test]
    fn test_header_cookie_path_matrix() {
        let mut req = RequestContext::new(Method::GET, "/cars/volvo")
            .with_header("X-Trace", "abc")
            .with_header("cookie", "session=s1; theme=dark");
        req.path_params.push((Arc::from("make"), "volvo".to_string()));
        req.matrix_params.push((Arc::from("color"), "red".to_string()));

        let header = Param::header("x-trace");
        assert_eq!(
            resolve(&NamedValueResolverFactory::header(), &header, &mut req).unwrap(),
            json!("abc")
        );
        let cookie = Param::cookie("theme");
        assert_eq!(
            resolve(&NamedValueResolverFactory::cookie(), &cookie, &mut req).unwrap(),
            json!("dark")
        );
        let make = Param::path("make");
        assert_eq!(
            resolve(&NamedValueResolverFactory::path(), &make, &mut req).unwrap(),
            json!("volvo")
        );
        let color = Param::matrix("color");
        assert_eq!(
            resolve(&NamedValueResolverFactory::matrix(), &color, &mut req).unwrap(),
            json!("red")
        );
    }

    #[test]
    fn test_attribute_values_pass_through() {
        let mut req = RequestContext::new(Method::GET, "/");
        req.set_attribute("user", json!({"id": 7}));
        req.set_attribute("count", json!("12"));
        let factory = NamedValueResolverFactory::attribute();
        assert_eq!(
            resolve(&factory, &Param::attribute("user").of(ParamType::Json), &mut req).unwrap(),
            json!({"id": 7})
        );
        assert_eq!(
            resolve(&factory, &Param::attribute("count").of(ParamType::I64), &mut req).unwrap(),
            json!(12)
        );
    }

    #[test]
    fn test_failure_parameter() {
        let converters = Arc::new(ConverterLookup::new());
        let failure = Failure::illegal_argument("bad id");
        let mut req = RequestContext::new(Method::GET, "/");

        let as_json = FailureResolverFactory
            .create_resolver(&Param::failure(), &converters)
            .unwrap();
        let value = as_json
            .resolve(&mut ResolveContext {
                request: &mut req,
                failure: Some(&failure),
            })
            .unwrap();
        assert_eq!(value["kind"], "IllegalArgument");

        let as_text = FailureResolverFactory
            .create_resolver(&Param::failure().of(ParamType::String), &converters)
            .unwrap();
        let value = as_text
            .resolve(&mut ResolveContext {
                request: &mut req,
                failure: Some(&failure),
            })
            .unwrap();
        assert_eq!(value, json!("bad id"));
    }

    #[test]
    fn test_named_type_without_converter_fails_at_build() {
        let converters = Arc::new(ConverterLookup::new());
        let param = Param::query("amount").of(ParamType::Named("Money"));
        assert!(matches!(
            NamedValueResolverFactory::query().create_resolver(&param, &converters),
            Err(BuildError::NoConverter { .. })
        ));
    }
}
