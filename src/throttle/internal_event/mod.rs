//! Metrics and log events emitted while trials and searches run.
//!
//! Hot-path events are *registered*: the metric handles are resolved once per
//! worker and reused for every emission. One-off events implement
//! [`InternalEvent`] and are emitted by value.

mod search;
mod throttle;

pub use search::{SearchFinished, SearchIterationCompleted};
pub use throttle::{
    RequestCompleted, RequestCompletedHandle, RequestFailed, RequestFailedHandle, TrialCompleted,
};

/// An event emitted once, by value.
pub trait InternalEvent: Sized {
    fn emit(self);
}

pub fn emit(event: impl InternalEvent) {
    event.emit();
}

/// An event whose metric handles are resolved up front.
pub trait RegisterInternalEvent: Sized {
    type Handle: InternalEventHandle;

    fn register(self) -> Self::Handle;
}

pub trait InternalEventHandle: Sized {
    type Data: Sized;

    fn emit(&self, data: Self::Data);
}

/// Declares a registered event: a unit struct, its handle holding the
/// pre-resolved metrics, and the handle's `emit` body.
#[macro_export]
macro_rules! registered_event {
    (
        $event:ident => {
            $( $field:ident: $type:ty = $value:expr, )*
        }

        fn emit(&$slf:ident, $data_name:ident: $data_type:ty)
            $emit_body:block
    ) => {
        ::paste::paste! {
            #[derive(Clone, Copy, Debug)]
            pub struct $event;

            impl $crate::throttle::internal_event::RegisterInternalEvent for $event {
                type Handle = [<$event Handle>];

                fn register(self) -> Self::Handle {
                    [<$event Handle>] {
                        $( $field: $value, )*
                    }
                }
            }

            #[derive(Clone)]
            pub struct [<$event Handle>] {
                $( $field: $type, )*
            }

            impl $crate::throttle::internal_event::InternalEventHandle for [<$event Handle>] {
                type Data = $data_type;

                fn emit(&$slf, $data_name: $data_type)
                    $emit_body
            }
        }
    };
}
