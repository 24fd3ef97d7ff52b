mod dataflow;
mod decimation_props;
mod lifecycle;
mod multiplexing;
mod support;
