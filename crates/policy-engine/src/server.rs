//! Terminates the proxy's bidirectional `Process` stream: looks up the
//! chain for the route key in the live [`SnapshotStore`], drives
//! [`ContextStore`] and the executor for each phase, and writes back
//! whatever the translator produces.
//!
//! One task per stream; within a stream, messages are handled strictly in
//! arrival order. The context for an exchange lives in the `ContextStore`
//! keyed by request id so concurrent streams never share state, and so a
//! chain handed out by the snapshot store stays alive (via its `Arc`) for
//! exactly as long as the exchange referencing it is in flight.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use policy_core::request_id;
use policy_core::strng::Strng;
use policy_proto::ext_proc::external_processor_server::ExternalProcessor;
use policy_proto::ext_proc::processing_request::Request as WireRequest;
use policy_proto::ext_proc::processing_response::Response as WireResponse;
use policy_proto::ext_proc::{
	BodyResponse, CommonResponse, HeadersResponse, HttpHeader, ImmediateResponse as WireImmediateResponse, ProcessingRequest,
	ProcessingResponse, TrailersResponse,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{Instrument, error, info_span, warn};

use crate::chain::PolicyChain;
use crate::context::{Body, Headers, RequestContext, ResponseContext};
use crate::error::{ChainExecutionError, ProtocolError};
use crate::executor::{execute_request, execute_response};
use crate::store::{ContextStore, SnapshotStore, StoredExchange};
use crate::translator;

pub type ProcessStream = Pin<Box<dyn Stream<Item = Result<ProcessingResponse, Status>> + Send>>;

/// Backpressure on the outbound half of one stream. Bounded so a stalled
/// proxy read applies backpressure to this task rather than letting
/// responses queue unbounded in memory.
const OUTBOUND_CHANNEL_CAPACITY: usize = 16;

pub struct ExternalProcessorService {
	snapshots: Arc<SnapshotStore>,
	contexts: Arc<ContextStore>,
}

impl ExternalProcessorService {
	pub fn new(snapshots: Arc<SnapshotStore>, contexts: Arc<ContextStore>) -> Self {
		Self { snapshots, contexts }
	}
}

#[tonic::async_trait]
impl ExternalProcessor for ExternalProcessorService {
	type ProcessStream = ProcessStream;

	async fn process(&self, request: Request<Streaming<ProcessingRequest>>) -> Result<Response<Self::ProcessStream>, Status> {
		let mut incoming = request.into_inner();
		let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
		let snapshots = self.snapshots.clone();
		let contexts = self.contexts.clone();

		tokio::spawn(
			async move {
				let mut request_id: Option<Strng> = None;
				loop {
					let msg = match incoming.message().await {
						Ok(Some(msg)) => msg,
						Ok(None) => break,
						Err(status) => {
							warn!(error = %status, "ext_proc stream read error");
							break;
						},
					};

					let Some(kind) = msg.request else { continue };
					let route_key = msg.route_key;
					let supplied_id = (!msg.request_id.is_empty()).then(|| Strng::from(msg.request_id.as_str()));

					match handle_message(&snapshots, &contexts, &mut request_id, supplied_id, &route_key, kind).await {
						Ok(Some(response)) => {
							if tx.send(Ok(response)).await.is_err() {
								break;
							}
						},
						Ok(None) => {},
						Err(status) => {
							let _ = tx.send(Err(status)).await;
							break;
						},
					}
				}
				if let Some(id) = request_id {
					contexts.remove(&id);
				}
			}
			.instrument(info_span!("ext_proc_stream")),
		);

		Ok(Response::new(Box::pin(ReceiverStream::new(rx)) as ProcessStream))
	}
}

/// What the request-phase executor produced, translated but not yet wrapped
/// in the message-kind-specific wire envelope (`HeadersResponse` vs.
/// `BodyResponse`) — that wrapping depends on which frame triggered
/// execution, so it's applied by the caller.
enum RequestOutcome {
	Modifications(CommonResponse),
	Immediate(WireImmediateResponse),
}

/// Dispatches one incoming message kind, returning the wire frame to write
/// back (if any) or a terminal gRPC status. `current_id` threads the
/// request id resolved on the first frame of the stream through to
/// subsequent frames and to stream teardown.
async fn handle_message(
	snapshots: &SnapshotStore,
	contexts: &ContextStore,
	current_id: &mut Option<Strng>,
	supplied_id: Option<Strng>,
	route_key: &str,
	kind: WireRequest,
) -> Result<Option<ProcessingResponse>, Status> {
	match kind {
		WireRequest::RequestHeaders(headers) => {
			let id = supplied_id.unwrap_or_else(request_id::mint);
			*current_id = Some(id.clone());

			let Some(chain) = snapshots.get(route_key) else {
				tracing::debug!(%route_key, "no chain installed for route; passthrough");
				return Ok(Some(wrap_request_headers(RequestOutcome::Modifications(
					translator::passthrough_common_response(),
				))));
			};

			let mut ctx = RequestContext::new(headers.path.clone(), headers.method.clone(), id.clone());
			ctx.set_received_headers(headers_from_wire(&headers.headers));

			if chain.requires_request_body {
				contexts
					.put(id, ctx, chain.clone())
					.map_err(protocol_error_to_status)?;
				Ok(Some(wrap_request_headers(RequestOutcome::Modifications(translator::headers_ack_common_response(
					&chain,
				)))))
			} else {
				let outcome = run_request_phase(&chain, &mut ctx)?;
				if let RequestOutcome::Modifications(_) = &outcome {
					contexts
						.put(id, ctx, chain.clone())
						.map_err(protocol_error_to_status)?;
				}
				Ok(Some(wrap_request_headers(outcome)))
			}
		},

		WireRequest::RequestBody(body) => {
			let Some(id) = current_id.clone() else {
				log_out_of_sequence("request body frame arrived before a request headers frame");
				return Ok(Some(wrap_request_body(RequestOutcome::Modifications(translator::passthrough_common_response()))));
			};
			let Some(exchange) = contexts.get(&id) else {
				log_out_of_sequence(format!("request body frame for unknown or already-completed request id {id}"));
				return Ok(Some(wrap_request_body(RequestOutcome::Modifications(translator::passthrough_common_response()))));
			};
			let mut exchange = exchange.lock();

			{
				let buf = exchange.ctx.body.get_or_insert_with(Body::default);
				buf.content.extend_from_slice(&body.body);
				buf.present = true;
				buf.end_of_stream = body.end_of_stream;
			}

			if exchange.request_phase_ran || !body.end_of_stream {
				let chain = exchange.chain.clone();
				return Ok(Some(wrap_request_body(RequestOutcome::Modifications(translator::headers_ack_common_response(
					&chain,
				)))));
			}

			let chain = exchange.chain.clone();
			let outcome = run_request_phase(&chain, &mut exchange.ctx)?;
			exchange.request_phase_ran = true;
			let terminal = matches!(outcome, RequestOutcome::Immediate(_));
			drop(exchange);
			if terminal {
				contexts.remove(&id);
			}
			Ok(Some(wrap_request_body(outcome)))
		},

		WireRequest::RequestTrailers(_) => Ok(Some(wrap(WireResponse::RequestTrailers(TrailersResponse {
			header_mutation: None,
		})))),

		WireRequest::ResponseHeaders(headers) => {
			let Some(id) = current_id.clone() else {
				log_out_of_sequence("response headers frame arrived before a request headers frame");
				return Ok(Some(wrap(WireResponse::ResponseHeaders(HeadersResponse {
					response: Some(translator::passthrough_common_response()),
				}))));
			};
			let Some(exchange) = contexts.get(&id) else {
				log_out_of_sequence(format!("response headers frame for unknown or already-completed request id {id}"));
				return Ok(Some(wrap(WireResponse::ResponseHeaders(HeadersResponse {
					response: Some(translator::passthrough_common_response()),
				}))));
			};
			let mut exchange = exchange.lock();

			let mut response_ctx = ResponseContext::from_request(&exchange.ctx, headers.status_code as u16);
			response_ctx.set_received_response_headers(headers_from_wire(&headers.headers));
			let chain = exchange.chain.clone();
			exchange.response = Some(response_ctx);

			if chain.requires_response_body {
				Ok(Some(wrap(WireResponse::ResponseHeaders(HeadersResponse {
					response: Some(translator::headers_ack_common_response(&chain)),
				}))))
			} else {
				let frame = run_response_phase(&chain, &mut exchange);
				drop(exchange);
				contexts.remove(&id);
				Ok(Some(wrap(WireResponse::ResponseHeaders(HeadersResponse { response: Some(frame) }))))
			}
		},

		WireRequest::ResponseBody(body) => {
			let Some(id) = current_id.clone() else {
				log_out_of_sequence("response body frame arrived before a request headers frame");
				return Ok(Some(wrap(WireResponse::ResponseBody(BodyResponse {
					response: Some(translator::passthrough_common_response()),
				}))));
			};
			let Some(exchange) = contexts.get(&id) else {
				log_out_of_sequence(format!("response body frame for unknown or already-completed request id {id}"));
				return Ok(Some(wrap(WireResponse::ResponseBody(BodyResponse {
					response: Some(translator::passthrough_common_response()),
				}))));
			};
			let mut exchange = exchange.lock();

			let have_response_ctx = exchange.response.is_some();
			if !have_response_ctx {
				log_out_of_sequence(format!("response body frame before a response headers frame for request id {id}"));
				return Ok(Some(wrap(WireResponse::ResponseBody(BodyResponse {
					response: Some(translator::passthrough_common_response()),
				}))));
			}
			{
				let response_ctx = exchange.response.as_mut().expect("checked above");
				let buf = response_ctx.response_body.get_or_insert_with(Body::default);
				buf.content.extend_from_slice(&body.body);
				buf.present = true;
				buf.end_of_stream = body.end_of_stream;
			}

			if exchange.response_phase_ran || !body.end_of_stream {
				let chain = exchange.chain.clone();
				return Ok(Some(wrap(WireResponse::ResponseBody(BodyResponse {
					response: Some(translator::headers_ack_common_response(&chain)),
				}))));
			}

			let chain = exchange.chain.clone();
			let frame = run_response_phase(&chain, &mut exchange);
			drop(exchange);
			contexts.remove(&id);
			Ok(Some(wrap(WireResponse::ResponseBody(BodyResponse { response: Some(frame) }))))
		},

		WireRequest::ResponseTrailers(_) => Ok(Some(wrap(WireResponse::ResponseTrailers(TrailersResponse {
			header_mutation: None,
		})))),
	}
}

/// Runs the request-phase chain and translates the result into either a
/// modification frame or, on short-circuit, an immediate-response frame.
fn run_request_phase(chain: &PolicyChain, ctx: &mut RequestContext) -> Result<RequestOutcome, Status> {
	match execute_request(chain, ctx) {
		Ok(result) if result.short_circuited => {
			let immediate = result.final_action.as_ref().expect("short_circuited implies final_action");
			Ok(RequestOutcome::Immediate(translator::immediate_response_frame(immediate)))
		},
		Ok(result) => Ok(RequestOutcome::Modifications(translator::request_common_response(chain, ctx, &result))),
		Err(ChainExecutionError::CelRuntimeError { policy, version, reason }) => {
			error!(%policy, %version, %reason, "CEL runtime error during request phase");
			// Short-circuits the phase with a synthesized internal-error
			// immediate response rather than a terminal gRPC status, so the
			// exchange still gets a reply.
			let synthesized = crate::action::ImmediateResponse {
				status_code: 500,
				headers: Default::default(),
				body: format!("policy {policy}@{version} condition evaluation failed: {reason}").into_bytes(),
			};
			Ok(RequestOutcome::Immediate(translator::immediate_response_frame(&synthesized)))
		},
		Err(e) => Err(Status::internal(e.to_string())),
	}
}

/// Runs the response-phase chain. A CEL runtime error here logs and yields
/// no mutations rather than aborting the stream — the response has already
/// been decided upstream and can't be short-circuited.
fn run_response_phase(chain: &PolicyChain, exchange: &mut StoredExchange) -> CommonResponse {
	let req_snapshot = exchange.ctx.as_cel_snapshot();
	let response_ctx = exchange.response.as_mut().expect("response phase requires a built ResponseContext");
	exchange.response_phase_ran = true;
	match execute_response(chain, Some(&req_snapshot), response_ctx) {
		Ok(result) => translator::response_common_response(chain, response_ctx, &result),
		Err(ChainExecutionError::CelRuntimeError { policy, version, reason }) => {
			error!(%policy, %version, %reason, "CEL runtime error during response phase; emitting no mutations");
			translator::passthrough_common_response()
		},
		Err(e) => {
			error!(error = %e, "internal error during response phase; emitting no mutations");
			translator::passthrough_common_response()
		},
	}
}

/// Logs a frame that arrived with no matching in-flight exchange — a
/// request body, response headers, or response body frame with no prior
/// request-headers frame on this stream, or naming a request id the
/// context store has already dropped. Passthrough, not a terminal status:
/// a single stray frame shouldn't tear down a stream carrying other,
/// correctly-sequenced exchanges.
fn log_out_of_sequence(detail: impl Into<String>) {
	let protocol_error = ProtocolError::OutOfSequence { detail: detail.into() };
	warn!(%protocol_error, "passing the frame through unmodified");
}

fn headers_from_wire(list: &[HttpHeader]) -> Headers {
	let mut headers = Headers::new();
	for h in list {
		headers.append(&h.key, h.values.iter().cloned());
	}
	headers
}

fn wrap_request_headers(outcome: RequestOutcome) -> ProcessingResponse {
	match outcome {
		RequestOutcome::Modifications(common) => wrap(WireResponse::RequestHeaders(HeadersResponse { response: Some(common) })),
		RequestOutcome::Immediate(immediate) => wrap(WireResponse::ImmediateResponse(immediate)),
	}
}

fn wrap_request_body(outcome: RequestOutcome) -> ProcessingResponse {
	match outcome {
		RequestOutcome::Modifications(common) => wrap(WireResponse::RequestBody(BodyResponse { response: Some(common) })),
		RequestOutcome::Immediate(immediate) => wrap(WireResponse::ImmediateResponse(immediate)),
	}
}

fn wrap(response: WireResponse) -> ProcessingResponse {
	ProcessingResponse { response: Some(response) }
}

fn protocol_error_to_status(e: crate::error::ProtocolError) -> Status {
	match e {
		crate::error::ProtocolError::ResourceExhausted { detail } => Status::resource_exhausted(detail),
		other => Status::internal(other.to_string()),
	}
}
