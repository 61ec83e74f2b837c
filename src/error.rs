use crate::mapping::MappingError;

/// Failure while assembling a dispatcher at startup.
///
/// Everything that can be decided once (route compilation, resolver selection, scheduler
/// lookup) is checked while building, so none of these surface per request.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("no resolver supports parameter '{param}' of handler '{handler}'")]
    NoParamResolver { handler: String, param: String },

    #[error("no response entity resolver supports handler '{handler}'")]
    NoResponseResolver { handler: String },

    #[error("no converter registered for type '{type_name}' (parameter '{param}' of '{handler}')")]
    NoConverter {
        handler: String,
        param: String,
        type_name: String,
    },

    #[error("route '{route}' references unknown scheduler '{scheduler}'")]
    UnknownScheduler { route: String, scheduler: String },

    #[error("default scheduler '{0}' is not registered")]
    MissingDefaultScheduler(String),

    #[error("failed to start scheduler '{name}': {source}")]
    SchedulerStart {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
