use std::sync::mpsc::Receiver;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::thread::JoinHandle;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) store_message_handlers: Vec<HandlerPtr<StoreMessageEvent>>,
    pub(crate) forward_message_handlers: Vec<HandlerPtr<ForwardMessageEvent>>,
    pub(crate) drop_message_handlers: Vec<HandlerPtr<DropMessageEvent>>,
    pub(crate) delay_message_handlers: Vec<HandlerPtr<DelayMessageEvent>>,
    pub(crate) resume_message_handlers: Vec<HandlerPtr<ResumeMessageEvent>>,
    pub(crate) delay_timeout_handlers: Vec<HandlerPtr<DelayTimeoutEvent>>,
    pub(crate) start_cycle_phase_handlers: Vec<HandlerPtr<StartCyclePhaseEvent>>,
    pub(crate) add_to_slope_handlers: Vec<HandlerPtr<AddToSlopeEvent>>,
    pub(crate) remove_from_slope_handlers: Vec<HandlerPtr<RemoveFromSlopeEvent>>,
    pub(crate) request_signature_handlers: Vec<HandlerPtr<RequestSignatureEvent>>,
    pub(crate) receive_record_handlers: Vec<HandlerPtr<ReceiveRecordEvent>>,
    pub(crate) ping_handlers: Vec<HandlerPtr<PingEvent>>,
    pub(crate) pong_handlers: Vec<HandlerPtr<PongEvent>>,
}

impl EventHandlers {
    pub(crate) fn new(
        log_events: bool,
        on_store_message: Option<HandlerPtr<StoreMessageEvent>>,
        on_forward_message: Option<HandlerPtr<ForwardMessageEvent>>,
        on_drop_message: Option<HandlerPtr<DropMessageEvent>>,
        on_delay_message: Option<HandlerPtr<DelayMessageEvent>>,
        on_resume_message: Option<HandlerPtr<ResumeMessageEvent>>,
        on_delay_timeout: Option<HandlerPtr<DelayTimeoutEvent>>,
        on_start_cycle_phase: Option<HandlerPtr<StartCyclePhaseEvent>>,
        on_add_to_slope: Option<HandlerPtr<AddToSlopeEvent>>,
        on_remove_from_slope: Option<HandlerPtr<RemoveFromSlopeEvent>>,
        on_request_signature: Option<HandlerPtr<RequestSignatureEvent>>,
        on_receive_record: Option<HandlerPtr<ReceiveRecordEvent>>,
        on_ping: Option<HandlerPtr<PingEvent>>,
        on_pong: Option<HandlerPtr<PongEvent>>,
    ) -> EventHandlers {
        let mut handlers = EventHandlers {
            store_message_handlers: on_store_message.into_iter().collect(),
            forward_message_handlers: on_forward_message.into_iter().collect(),
            drop_message_handlers: on_drop_message.into_iter().collect(),
            delay_message_handlers: on_delay_message.into_iter().collect(),
            resume_message_handlers: on_resume_message.into_iter().collect(),
            delay_timeout_handlers: on_delay_timeout.into_iter().collect(),
            start_cycle_phase_handlers: on_start_cycle_phase.into_iter().collect(),
            add_to_slope_handlers: on_add_to_slope.into_iter().collect(),
            remove_from_slope_handlers: on_remove_from_slope.into_iter().collect(),
            request_signature_handlers: on_request_signature.into_iter().collect(),
            receive_record_handlers: on_receive_record.into_iter().collect(),
            ping_handlers: on_ping.into_iter().collect(),
            pong_handlers: on_pong.into_iter().collect(),
        };
        if log_events {
            handlers.add_logging_handlers();
        }
        handlers
    }

    fn add_logging_handlers(&mut self) {
        self.store_message_handlers.push(StoreMessageEvent::get_logger());
        self.forward_message_handlers.push(ForwardMessageEvent::get_logger());
        self.drop_message_handlers.push(DropMessageEvent::get_logger());
        self.delay_message_handlers.push(DelayMessageEvent::get_logger());
        self.resume_message_handlers.push(ResumeMessageEvent::get_logger());
        self.delay_timeout_handlers.push(DelayTimeoutEvent::get_logger());
        self.start_cycle_phase_handlers.push(StartCyclePhaseEvent::get_logger());
        self.add_to_slope_handlers.push(AddToSlopeEvent::get_logger());
        self.remove_from_slope_handlers.push(RemoveFromSlopeEvent::get_logger());
        self.request_signature_handlers.push(RequestSignatureEvent::get_logger());
        self.receive_record_handlers.push(ReceiveRecordEvent::get_logger());
        self.ping_handlers.push(PingEvent::get_logger());
        self.pong_handlers.push(PongEvent::get_logger());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.store_message_handlers.is_empty()
            && self.forward_message_handlers.is_empty()
            && self.drop_message_handlers.is_empty()
            && self.delay_message_handlers.is_empty()
            && self.resume_message_handlers.is_empty()
            && self.delay_timeout_handlers.is_empty()
            && self.start_cycle_phase_handlers.is_empty()
            && self.add_to_slope_handlers.is_empty()
            && self.remove_from_slope_handlers.is_empty()
            && self.request_signature_handlers.is_empty()
            && self.receive_record_handlers.is_empty()
            && self.ping_handlers.is_empty()
            && self.pong_handlers.is_empty()
    }

    pub fn fire_handlers(&self, event: Event) {
        match event {
            Event::StoreMessage(store_message_event) => self
                .store_message_handlers
                .iter()
                .for_each(|handler| handler(&store_message_event)),

            Event::ForwardMessage(forward_message_event) => self
                .forward_message_handlers
                .iter()
                .for_each(|handler| handler(&forward_message_event)),

            Event::DropMessage(drop_message_event) => self
                .drop_message_handlers
                .iter()
                .for_each(|handler| handler(&drop_message_event)),

            Event::DelayMessage(delay_message_event) => self
                .delay_message_handlers
                .iter()
                .for_each(|handler| handler(&delay_message_event)),

            Event::ResumeMessage(resume_message_event) => self
                .resume_message_handlers
                .iter()
                .for_each(|handler| handler(&resume_message_event)),

            Event::DelayTimeout(delay_timeout_event) => self
                .delay_timeout_handlers
                .iter()
                .for_each(|handler| handler(&delay_timeout_event)),

            Event::StartCyclePhase(start_cycle_phase_event) => self
                .start_cycle_phase_handlers
                .iter()
                .for_each(|handler| handler(&start_cycle_phase_event)),

            Event::AddToSlope(add_to_slope_event) => self
                .add_to_slope_handlers
                .iter()
                .for_each(|handler| handler(&add_to_slope_event)),

            Event::RemoveFromSlope(remove_from_slope_event) => self
                .remove_from_slope_handlers
                .iter()
                .for_each(|handler| handler(&remove_from_slope_event)),

            Event::RequestSignature(request_signature_event) => self
                .request_signature_handlers
                .iter()
                .for_each(|handler| handler(&request_signature_event)),

            Event::ReceiveRecord(receive_record_event) => self
                .receive_record_handlers
                .iter()
                .for_each(|handler| handler(&receive_record_event)),

            Event::Ping(ping_event) => self
                .ping_handlers
                .iter()
                .for_each(|handler| handler(&ping_event)),

            Event::Pong(pong_event) => self
                .pong_handlers
                .iter()
                .for_each(|handler| handler(&pong_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            // The worker (event publisher) may drop its sender slightly before the shutdown
            // signal arrives here.
            Err(TryRecvError::Disconnected) => (),
        }
    })
}
