mod method;
mod queue;
mod subrequest;
mod tick;
