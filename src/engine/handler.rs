use crate::contract::{CustomResourceRequest, CustomResourceResponse};

/// whatever sits behind the ServiceToken of a custom resource. A handler
/// never fails the call itself: errors are reported with a FAILED response,
/// the same way a real function reports them to CloudFormation.
pub trait CustomResourceHandler {
    fn handle(&mut self, request: &CustomResourceRequest) -> CustomResourceResponse;
}

impl<H: CustomResourceHandler + ?Sized> CustomResourceHandler for Box<H> {
    fn handle(&mut self, request: &CustomResourceRequest) -> CustomResourceResponse {
        (**self).handle(request)
    }
}
